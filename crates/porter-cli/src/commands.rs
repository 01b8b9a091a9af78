//! Subcommand implementations
//!
//! Each command writes its human-readable output to the given writer and
//! returns the process exit code.

use crate::settings::Settings;
use anyhow::Context;
use porter_apply::{
    ApplyEngine, ApplyOutcome, ApplyReport, FileCheckpointStore, InMemoryTarget, TracingSink,
    UserInputs,
};
use porter_core::{Action, ActionStatus, EntityCatalog};
use porter_plan::{Plan, PlanGenerator};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Invalid input: a plan that fails validation, or a fatal error
pub const EXIT_INVALID: i32 = 2;
/// Stopped by Ctrl-C
pub const EXIT_CANCELED: i32 = 130;

/// Exit code for a finished run
#[must_use]
pub fn outcome_code(outcome: ApplyOutcome) -> i32 {
    match outcome {
        ApplyOutcome::Complete => 0,
        ApplyOutcome::Partial => 1,
        ApplyOutcome::Canceled => EXIT_CANCELED,
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

/// Load a plan document
///
/// # Errors
/// Returns error if the file cannot be read or is not a plan
pub fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    Plan::from_json(&read(path)?).with_context(|| format!("loading plan {}", path.display()))
}

/// `porter plan`: generate a plan from a catalog document
///
/// The plan is written even when invalid, so the errors can be reviewed in
/// context.
///
/// # Errors
/// Returns error on unreadable or malformed catalogs
pub fn plan(catalog: &Path, output: Option<&Path>, out: &mut impl Write) -> anyhow::Result<i32> {
    let catalog = EntityCatalog::from_json(&read(catalog)?)
        .with_context(|| format!("loading catalog {}", catalog.display()))?;
    let plan = PlanGenerator::new().generate(&catalog)?;
    let json = plan.to_json()?;

    match output {
        Some(path) => {
            write_file(path, &json)?;
            writeln!(
                out,
                "wrote {} actions to {} (fingerprint {})",
                plan.len(),
                path.display(),
                short(plan.fingerprint())
            )?;
        }
        None => writeln!(out, "{json}")?,
    }

    if plan.is_runnable() {
        return Ok(0);
    }
    for error in &plan.validation().errors {
        warn!(%error, "plan validation failed");
        if output.is_some() {
            writeln!(out, "invalid: {error}")?;
        }
    }
    Ok(EXIT_INVALID)
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

/// How `inspect` lays out the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InspectView {
    /// One line per action in execution order
    #[default]
    Linear,
    /// Actions grouped by phase
    Phases,
}

fn action_line(action: &Action) -> String {
    let mut line = format!("{}  {:<22} {}", action.id, action.kind.as_str(), action.source_id);
    if !action.dependencies.is_empty() {
        let deps: Vec<String> = action.dependencies.iter().map(ToString::to_string).collect();
        line.push_str(&format!("  <- {}", deps.join(",")));
    }
    if action.requires_user_input {
        line.push_str("  [needs input]");
    }
    line
}

/// `porter inspect`: print a plan for review
///
/// # Errors
/// Returns error if the plan cannot be loaded
pub fn inspect(plan_path: &Path, view: InspectView, out: &mut impl Write) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    writeln!(
        out,
        "plan for {}: {} actions, fingerprint {}",
        plan.source(),
        plan.len(),
        short(plan.fingerprint())
    )?;

    if !plan.is_runnable() {
        for error in &plan.validation().errors {
            writeln!(out, "invalid: {error}")?;
        }
        return Ok(EXIT_INVALID);
    }

    match view {
        InspectView::Linear => {
            for action in plan.linear_view() {
                writeln!(out, "{}", action_line(action))?;
            }
        }
        InspectView::Phases => {
            for group in plan.phase_groups() {
                writeln!(out, "== {} ({}) ==", group.phase, group.actions.len())?;
                for id in &group.actions {
                    if let Some(action) = plan.action(*id) {
                        writeln!(out, "  {}", action_line(action))?;
                    }
                }
            }
        }
    }

    let awaiting: Vec<String> = plan.requires_user_input().map(Action::label).collect();
    if !awaiting.is_empty() {
        writeln!(out, "needs input: {}", awaiting.join(", "))?;
    }
    Ok(0)
}

/// Files used by `apply`
#[derive(Debug, Clone, Default)]
pub struct ApplyFiles {
    /// Overrides the configured checkpoint path
    pub checkpoint: Option<PathBuf>,
    /// JSON document of operator answers
    pub inputs: Option<PathBuf>,
    /// Where to write the report; stdout when absent
    pub report: Option<PathBuf>,
}

/// `porter apply`: run a plan against the simulated target
///
/// Ctrl-C cancels the run after in-flight actions finish; the checkpoint
/// file lets the next invocation resume.
///
/// # Errors
/// Returns error on unreadable inputs or a fatal engine error
pub async fn apply(
    plan_path: &Path,
    settings: &Settings,
    files: &ApplyFiles,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let inputs = match &files.inputs {
        Some(path) => UserInputs::from_json(&read(path)?)
            .with_context(|| format!("loading inputs {}", path.display()))?,
        None => UserInputs::new(),
    };
    let checkpoint = files
        .checkpoint
        .clone()
        .unwrap_or_else(|| settings.apply.checkpoint.clone());
    info!(plan = %plan_path.display(), checkpoint = %checkpoint.display(), "starting apply");

    let engine = ApplyEngine::new(
        plan,
        Arc::new(InMemoryTarget::new()),
        Arc::new(FileCheckpointStore::new(checkpoint)),
    )
    .with_config(settings.apply_config())
    .with_sink(Arc::new(TracingSink))
    .with_user_inputs(inputs);

    let cancel = engine.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight actions");
            cancel.cancel();
        }
    });
    let result = engine.run().await;
    interrupt.abort();
    let report = result?;

    let json = report.to_json()?;
    match &files.report {
        Some(path) => write_file(path, &json)?,
        None => writeln!(out, "{json}")?,
    }
    write_summary(&report, false, out)?;
    Ok(outcome_code(report.outcome))
}

fn write_summary(report: &ApplyReport, all: bool, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(
        out,
        "run {} {}{}: {}",
        report.run_id,
        report.outcome,
        if report.resumed { " (resumed)" } else { "" },
        report.summary()
    )?;
    for action in &report.actions {
        let noteworthy = matches!(
            action.status,
            ActionStatus::Failed | ActionStatus::SkippedBlocked
        ) || report.awaiting_input.contains(&action.id);
        if !(all || noteworthy) {
            continue;
        }
        let mut line = format!(
            "  {} {} {} {}",
            action.id,
            action.status,
            action.kind.as_str(),
            action.source_id
        );
        if report.awaiting_input.contains(&action.id) {
            line.push_str(": awaiting input");
        }
        if let Some(error) = &action.error {
            line.push_str(&format!(": {error}"));
        }
        if let Some(target) = &action.target_id {
            line.push_str(&format!(" -> {target}"));
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// `porter report`: summarize a saved report
///
/// # Errors
/// Returns error if the report cannot be loaded
pub fn report(path: &Path, all: bool, out: &mut impl Write) -> anyhow::Result<i32> {
    let report = ApplyReport::from_json(&read(path)?)
        .with_context(|| format!("loading report {}", path.display()))?;
    writeln!(
        out,
        "plan {} started {} finished {}",
        short(&report.plan_fingerprint),
        report.started_at.to_rfc3339(),
        report.finished_at.to_rfc3339()
    )?;
    write_summary(&report, all, out)?;
    Ok(outcome_code(report.outcome))
}
