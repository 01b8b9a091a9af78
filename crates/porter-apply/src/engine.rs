//! Apply engine
//!
//! A single owner loop holds every action's status. Worker tasks only run
//! executor calls and hand their result back; the loop applies transitions,
//! writes checkpoints and decides what to dispatch next. That keeps
//! checkpoint writes serialized and ordered before any later dispatch.
//!
//! ```text
//! pending ──▶ ready ──▶ running ──▶ succeeded
//!    │          │          │ ├────▶ failed
//!    │          │          └─┴─▶ ready (retry / rate limit)
//!    └──────────┴──▶ skipped-blocked
//! ```

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::client::TargetClient;
use crate::config::ApplyConfig;
use crate::context::ExecutionContext;
use crate::error::{ApplyError, ExecutionError};
use crate::events::{NullSink, ProgressEvent, ProgressSink};
use crate::executor::{ActionExecutor, ExecutionResult, ExecutorRegistry};
use crate::inputs::UserInputs;
use crate::report::{ActionReport, ApplyOutcome, ApplyReport};
use chrono::Utc;
use futures::FutureExt;
use porter_core::{validate_transition, Action, ActionId, ActionKind, ActionStatus};
use porter_plan::Plan;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Requests a graceful stop
///
/// In-flight actions finish and are checkpointed; nothing new is dispatched.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Executes a validated plan against a target
pub struct ApplyEngine {
    plan: Plan,
    client: Arc<dyn TargetClient>,
    store: Arc<dyn CheckpointStore>,
    config: ApplyConfig,
    registry: ExecutorRegistry,
    sink: Arc<dyn ProgressSink>,
    inputs: UserInputs,
    cancel: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("fingerprint", &self.plan.fingerprint())
            .field("actions", &self.plan.len())
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Per-action bookkeeping owned by the loop
#[derive(Debug, Default)]
struct Slot {
    status: ActionStatus,
    attempts: u32,
    retries: u32,
    rate_limited: u32,
    resumed: bool,
    awaiting_input: bool,
    next_eligible: Option<Instant>,
    /// Action with user inputs filled, set on entering `ready`
    prepared: Option<Action>,
    error: Option<ExecutionError>,
    blocked_by: Option<ActionId>,
    target_id: Option<String>,
}

impl Slot {
    /// Attempts that count against the retry cap
    fn counted_attempts(&self) -> u32 {
        self.attempts.saturating_sub(self.rate_limited)
    }
}

/// Mutable state of one run
struct Run<'a> {
    run_id: Uuid,
    seq: u64,
    sink: &'a dyn ProgressSink,
    slots: BTreeMap<ActionId, Slot>,
}

impl Run<'_> {
    fn status(&self, id: ActionId) -> ActionStatus {
        self.slots.get(&id).map_or(ActionStatus::Pending, |s| s.status)
    }

    fn transition(
        &mut self,
        action: &Action,
        to: ActionStatus,
        error: Option<String>,
    ) -> Result<(), ApplyError> {
        let Some(slot) = self.slots.get_mut(&action.id) else {
            return Ok(());
        };
        let from = slot.status;
        validate_transition(from, to)?;
        slot.status = to;
        let event = ProgressEvent {
            run_id: self.run_id,
            seq: self.seq,
            at: Utc::now(),
            action: action.id,
            kind: action.kind,
            from,
            to,
            attempt: slot.attempts,
            error,
        };
        self.seq += 1;
        self.sink.emit(event);
        Ok(())
    }

    fn has_ready(&self) -> bool {
        self.slots.values().any(|s| s.status == ActionStatus::Ready)
    }

    fn running(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.status == ActionStatus::Running)
            .count()
    }

    /// Earliest instant a ready action becomes eligible again
    fn earliest_eligible(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter(|s| s.status == ActionStatus::Ready)
            .filter_map(|s| s.next_eligible)
            .min()
    }
}

type Joined = (ActionId, ExecutionResult);

impl ApplyEngine {
    /// Engine with default config, the standard registry and no sink
    pub fn new(plan: Plan, client: Arc<dyn TargetClient>, store: Arc<dyn CheckpointStore>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            plan,
            client,
            store,
            config: ApplyConfig::default(),
            registry: ExecutorRegistry::standard(),
            sink: Arc::new(NullSink),
            inputs: UserInputs::default(),
            cancel: Arc::new(tx),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_user_inputs(mut self, inputs: UserInputs) -> Self {
        self.inputs = inputs;
        self
    }

    /// Handle that stops this engine's runs
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    #[must_use]
    pub fn config(&self) -> &ApplyConfig {
        &self.config
    }

    /// Run the plan to a terminal outcome
    ///
    /// Failed actions are reported, not returned as errors.
    ///
    /// # Errors
    /// - the plan failed validation
    /// - a kind in the plan has no executor
    /// - the checkpoint store fails (in-flight actions are drained first)
    #[instrument(skip(self), fields(source = %self.plan.source(), actions = self.plan.len()))]
    pub async fn run(&self) -> Result<ApplyReport, ApplyError> {
        if !self.plan.is_runnable() {
            return Err(ApplyError::InvalidPlan(self.plan.validation().errors.clone()));
        }
        let executors = self.executors()?;
        let started_at = Utc::now();

        let (checkpoint, resumed) = self.restore()?;
        let run_id = checkpoint.run_id;
        let ctx = Arc::new(ExecutionContext::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            checkpoint,
        ));

        let mut run = Run {
            run_id,
            seq: 0,
            sink: self.sink.as_ref(),
            slots: self.plan.actions().iter().map(|a| (a.id, Slot::default())).collect(),
        };
        self.resume(&mut run, &ctx)?;

        let mut cancel_rx = self.cancel.subscribe();
        let mut canceled = *cancel_rx.borrow_and_update();
        let mut fatal: Option<ApplyError> = None;
        let mut tasks: JoinSet<Joined> = JoinSet::new();

        loop {
            if !canceled && fatal.is_none() {
                self.refresh(&mut run)?;
                self.dispatch(&mut run, &mut tasks, &ctx, &executors)?;
            }
            if tasks.is_empty() && (canceled || fatal.is_some() || !run.has_ready()) {
                break;
            }

            let wake = if canceled || fatal.is_some() {
                None
            } else {
                self.next_wake(&run, &ctx)
            };
            let deadline = wake.unwrap_or_else(Instant::now);

            tokio::select! {
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok((id, result))) => {
                            if let Err(err) = self.settle(&mut run, &ctx, id, result) {
                                warn!(error = %err, "fatal error, draining in-flight actions");
                                fatal.get_or_insert(err);
                            }
                        }
                        Some(Err(join)) => {
                            fatal.get_or_insert(ApplyError::Join(join.to_string()));
                        }
                        None => {}
                    }
                }
                () = sleep_until(deadline), if wake.is_some() => {}
                changed = cancel_rx.changed(), if !canceled => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!(in_flight = tasks.len(), "cancel requested");
                        canceled = true;
                    }
                }
                else => break,
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        ctx.flush()?;
        let report = self.report(&run, &ctx, canceled, resumed, started_at);
        info!(outcome = %report.outcome, summary = %report.summary(), "apply finished");
        Ok(report)
    }

    fn executors(&self) -> Result<HashMap<ActionKind, Arc<dyn ActionExecutor>>, ApplyError> {
        let mut executors = HashMap::new();
        for action in self.plan.actions() {
            if executors.contains_key(&action.kind) {
                continue;
            }
            let executor = self
                .registry
                .get(action.kind)
                .ok_or(ApplyError::MissingExecutor(action.kind))?;
            executors.insert(action.kind, executor);
        }
        Ok(executors)
    }

    fn restore(&self) -> Result<(Checkpoint, bool), ApplyError> {
        let fingerprint = self.plan.fingerprint();
        match self.store.load()? {
            Some(mut checkpoint) => {
                if checkpoint.plan_fingerprint != fingerprint {
                    warn!(
                        checkpoint = %checkpoint.plan_fingerprint,
                        plan = %fingerprint,
                        "resuming against a different plan, matching by idempotency key"
                    );
                    checkpoint.plan_fingerprint = fingerprint.to_string();
                }
                info!(
                    run_id = %checkpoint.run_id,
                    executed = checkpoint.executed.len(),
                    "resuming from checkpoint"
                );
                Ok((checkpoint, true))
            }
            None => Ok((Checkpoint::new(fingerprint), false)),
        }
    }

    /// Mark actions completed by an earlier run
    fn resume(&self, run: &mut Run<'_>, ctx: &ExecutionContext) -> Result<(), ApplyError> {
        let checkpoint = ctx.checkpoint();
        for action in self.plan.actions() {
            if !checkpoint.is_executed(&action.idempotency_key) {
                continue;
            }
            run.transition(action, ActionStatus::Succeeded, None)?;
            if let Some(slot) = run.slots.get_mut(&action.id) {
                slot.resumed = true;
                slot.target_id = ctx.lookup(&action.produces());
            }
        }
        Ok(())
    }

    /// Promote pending actions whose dependencies succeeded; block the rest
    ///
    /// Walks in topological order so blocking cascades in one pass.
    fn refresh(&self, run: &mut Run<'_>) -> Result<(), ApplyError> {
        for action in self.plan.linear_view() {
            if run.status(action.id) != ActionStatus::Pending {
                continue;
            }
            if let Some(&blocker) = action
                .dependencies
                .iter()
                .find(|dep| run.status(**dep).blocks_dependents())
            {
                let reason = format!("blocked by {blocker}");
                debug!(action = %action.id, %blocker, "skipping");
                if let Some(slot) = run.slots.get_mut(&action.id) {
                    slot.blocked_by = Some(blocker);
                }
                run.transition(action, ActionStatus::SkippedBlocked, Some(reason))?;
                continue;
            }
            if !action
                .dependencies
                .iter()
                .all(|dep| run.status(*dep) == ActionStatus::Succeeded)
            {
                continue;
            }
            match self.inputs.prepare(action) {
                Ok(prepared) => {
                    if let Some(slot) = run.slots.get_mut(&action.id) {
                        slot.prepared = Some(prepared);
                        slot.awaiting_input = false;
                    }
                    run.transition(action, ActionStatus::Ready, None)?;
                }
                Err(prompt) => {
                    if let Some(slot) = run.slots.get_mut(&action.id) {
                        if !slot.awaiting_input {
                            info!(action = %action.id, %prompt, "awaiting user input");
                        }
                        slot.awaiting_input = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        run: &mut Run<'_>,
        tasks: &mut JoinSet<Joined>,
        ctx: &Arc<ExecutionContext>,
        executors: &HashMap<ActionKind, Arc<dyn ActionExecutor>>,
    ) -> Result<(), ApplyError> {
        let now = Instant::now();
        let mut candidates: Vec<&Action> = self
            .plan
            .actions()
            .iter()
            .filter(|a| {
                run.slots.get(&a.id).is_some_and(|s| {
                    s.status == ActionStatus::Ready && s.next_eligible.map_or(true, |t| t <= now)
                })
            })
            .collect();
        candidates.sort_by_key(|a| (a.phase, a.id));

        for action in candidates {
            if run.running() >= self.max_parallel() {
                break;
            }
            if let Some(until) = ctx.rate_gate(self.config.rate_reserve) {
                debug!(?until, "rate budget low, holding dispatch");
                break;
            }
            let Some(executor) = executors.get(&action.kind).cloned() else {
                return Err(ApplyError::MissingExecutor(action.kind));
            };
            let Some(slot) = run.slots.get_mut(&action.id) else {
                continue;
            };
            let prepared = slot.prepared.clone().unwrap_or_else(|| action.clone());
            slot.attempts += 1;
            slot.next_eligible = None;
            ctx.consume_budget();
            run.transition(action, ActionStatus::Running, None)?;
            debug!(action = %action.label(), key = action.idempotency_key.short(), "dispatch");

            let ctx = Arc::clone(ctx);
            let timeout = self.config.call_timeout;
            tasks.spawn(async move {
                let id = prepared.id;
                let call = AssertUnwindSafe(executor.execute(&prepared, &ctx)).catch_unwind();
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => ExecutionResult::failure(ExecutionError::terminal(format!(
                        "executor panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => ExecutionResult::failure(ExecutionError::retryable(format!(
                        "{} timed out after {timeout:?}",
                        prepared.kind
                    ))),
                };
                (id, result)
            });
        }
        Ok(())
    }

    /// Apply a finished attempt
    ///
    /// Only a checkpoint failure is returned as an error; the action's
    /// transition is recorded before it is.
    fn settle(
        &self,
        run: &mut Run<'_>,
        ctx: &ExecutionContext,
        id: ActionId,
        result: ExecutionResult,
    ) -> Result<(), ApplyError> {
        let Some(action) = self.plan.action(id) else {
            return Ok(());
        };
        let now = Instant::now();

        if result.succeeded {
            let committed = ctx.commit(id, action.idempotency_key.clone());
            if let Some(slot) = run.slots.get_mut(&id) {
                slot.target_id = result.produced_id;
                slot.error = None;
            }
            run.transition(action, ActionStatus::Succeeded, None)?;
            return committed.map_err(ApplyError::from);
        }

        let error = result
            .error
            .unwrap_or_else(|| ExecutionError::terminal("executor reported failure without an error"));
        let Some(slot) = run.slots.get_mut(&id) else {
            return Ok(());
        };

        match error {
            error @ ExecutionError::RateLimited { .. }
                if !self.config.retry.allows_rate_limit_wait(slot.rate_limited) =>
            {
                slot.rate_limited += 1;
                let error = error.exhausted(slot.rate_limited);
                let message = error.to_string();
                warn!(action = %action.label(), error = %message, "rate limit waits exhausted");
                slot.error = Some(error);
                run.transition(action, ActionStatus::Failed, Some(message))
            }
            ExecutionError::RateLimited { reset_after, .. } => {
                let until = now + reset_after;
                ctx.pause_until(until);
                slot.rate_limited += 1;
                slot.retries += 1;
                slot.next_eligible = Some(until);
                let message = error.to_string();
                info!(action = %action.label(), ?reset_after, "rate limited, pausing dispatch");
                slot.error = Some(error);
                run.transition(action, ActionStatus::Ready, Some(message))
            }
            error if error.is_retryable() && result.retryable => {
                let counted = slot.counted_attempts();
                if self.config.retry.allows_retry(counted) {
                    let delay = self.config.retry.backoff(counted);
                    slot.retries += 1;
                    slot.next_eligible = Some(now + delay);
                    let message = error.to_string();
                    warn!(action = %action.label(), attempt = counted, ?delay, error = %message, "retrying");
                    slot.error = Some(error);
                    run.transition(action, ActionStatus::Ready, Some(message))
                } else {
                    let error = error.exhausted(counted);
                    let message = error.to_string();
                    warn!(action = %action.label(), error = %message, "retries exhausted");
                    slot.error = Some(error);
                    run.transition(action, ActionStatus::Failed, Some(message))
                }
            }
            error => {
                let message = error.to_string();
                warn!(action = %action.label(), error = %message, "action failed");
                slot.error = Some(error);
                run.transition(action, ActionStatus::Failed, Some(message))
            }
        }
    }

    /// Pool size; a hand-built config may carry zero
    fn max_parallel(&self) -> usize {
        self.config.max_parallel.max(1)
    }

    /// When the loop should look again without a task finishing
    fn next_wake(&self, run: &Run<'_>, ctx: &ExecutionContext) -> Option<Instant> {
        if !run.has_ready() || run.running() >= self.max_parallel() {
            return None;
        }
        if let Some(gate) = ctx.rate_gate(self.config.rate_reserve) {
            return Some(gate);
        }
        run.earliest_eligible()
    }

    fn report(
        &self,
        run: &Run<'_>,
        ctx: &ExecutionContext,
        canceled: bool,
        resumed: bool,
        started_at: chrono::DateTime<Utc>,
    ) -> ApplyReport {
        let mut awaiting_input = Vec::new();
        let actions: Vec<ActionReport> = self
            .plan
            .actions()
            .iter()
            .map(|action| {
                let slot = run.slots.get(&action.id);
                let status = slot.map_or(ActionStatus::Pending, |s| s.status);
                if status == ActionStatus::Pending && slot.is_some_and(|s| s.awaiting_input) {
                    awaiting_input.push(action.id);
                }
                let (error, detail) = match slot {
                    Some(s) if status == ActionStatus::Failed => (
                        s.error.as_ref().map(ToString::to_string),
                        s.error.as_ref().map(|e| e.detail().to_string()),
                    ),
                    Some(s) if status == ActionStatus::SkippedBlocked => {
                        (s.blocked_by.map(|b| format!("blocked by {b}")), None)
                    }
                    _ => (None, None),
                };
                ActionReport {
                    id: action.id,
                    kind: action.kind,
                    source_id: action.source_id.clone(),
                    phase: action.phase,
                    idempotency_key: action.idempotency_key.clone(),
                    status,
                    attempts: slot.map_or(0, |s| s.attempts),
                    retries: slot.map_or(0, |s| s.retries),
                    rate_limited: slot.map_or(0, |s| s.rate_limited),
                    resumed: slot.is_some_and(|s| s.resumed),
                    error,
                    detail,
                    target_id: slot.and_then(|s| s.target_id.clone()),
                }
            })
            .collect();

        let outcome = if canceled {
            ApplyOutcome::Canceled
        } else if actions.iter().all(|a| a.status == ActionStatus::Succeeded) {
            ApplyOutcome::Complete
        } else {
            ApplyOutcome::Partial
        };

        ApplyReport {
            run_id: run.run_id,
            plan_fingerprint: self.plan.fingerprint().to_string(),
            outcome,
            started_at,
            finished_at: Utc::now(),
            actions,
            id_map: ctx.id_map(),
            awaiting_input,
            resumed,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
