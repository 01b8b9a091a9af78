//! Apply report

use crate::context::IdMap;
use chrono::{DateTime, Utc};
use porter_core::{ActionId, ActionKind, ActionStatus, IdempotencyKey, Phase};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyOutcome {
    /// Every action succeeded
    Complete,
    /// Some actions failed, were blocked or await input
    Partial,
    /// Stopped by a cancel request; the checkpoint is resumable
    Canceled,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Canceled => "canceled",
        })
    }
}

/// Final state of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub id: ActionId,
    pub kind: ActionKind,
    pub source_id: String,
    pub phase: Phase,
    pub idempotency_key: IdempotencyKey,
    pub status: ActionStatus,
    /// Executor calls made in this run
    pub attempts: u32,
    /// Re-dispatches after a failed attempt
    pub retries: u32,
    /// Attempts answered with a rate-limit signal
    pub rate_limited: u32,
    /// Completed by an earlier run
    #[serde(default)]
    pub resumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Upstream failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// Status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_blocked: usize,
    /// Never started (awaiting input, behind such an action, or canceled)
    pub not_started: usize,
    pub awaiting_input: usize,
    pub resumed: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} actions: {} succeeded ({} resumed), {} failed, {} skipped-blocked, {} not started ({} awaiting input)",
            self.total,
            self.succeeded,
            self.resumed,
            self.failed,
            self.skipped_blocked,
            self.not_started,
            self.awaiting_input
        )
    }
}

/// Result of an apply run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub plan_fingerprint: String,
    pub outcome: ApplyOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-action results in action id order
    pub actions: Vec<ActionReport>,
    pub id_map: IdMap,
    /// Actions held back for missing operator input
    pub awaiting_input: Vec<ActionId>,
    /// Whether the run started from an existing checkpoint
    pub resumed: bool,
}

impl ApplyReport {
    /// Report for one action
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&ActionReport> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Actions in a given status
    pub fn with_status(&self, status: ActionStatus) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(move |a| a.status == status)
    }

    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.actions.len(),
            awaiting_input: self.awaiting_input.len(),
            ..ReportSummary::default()
        };
        for action in &self.actions {
            match action.status {
                ActionStatus::Succeeded => summary.succeeded += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::SkippedBlocked => summary.skipped_blocked += 1,
                ActionStatus::Pending | ActionStatus::Ready | ActionStatus::Running => {
                    summary.not_started += 1;
                }
            }
            if action.resumed {
                summary.resumed += 1;
            }
        }
        summary
    }

    /// Pretty JSON document
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a report document
    ///
    /// # Errors
    /// Returns error on malformed JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_core::IdempotencyKeyer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn action(id: u32, status: ActionStatus) -> ActionReport {
        ActionReport {
            id: ActionId(id),
            kind: ActionKind::LabelCreate,
            source_id: format!("l{id}"),
            phase: Phase::IssueImport,
            idempotency_key: IdempotencyKeyer::new().key(ActionKind::LabelCreate, &id.to_string(), &json!({})),
            status,
            attempts: u32::from(status != ActionStatus::Pending),
            retries: 0,
            rate_limited: 0,
            resumed: false,
            error: None,
            detail: None,
            target_id: None,
        }
    }

    fn report() -> ApplyReport {
        ApplyReport {
            run_id: Uuid::nil(),
            plan_fingerprint: "fp".into(),
            outcome: ApplyOutcome::Partial,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            actions: vec![
                action(0, ActionStatus::Succeeded),
                action(1, ActionStatus::Failed),
                action(2, ActionStatus::SkippedBlocked),
                action(3, ActionStatus::Pending),
            ],
            id_map: IdMap::new(),
            awaiting_input: vec![ActionId(3)],
            resumed: false,
        }
    }

    #[test]
    fn summary_counts_statuses() {
        let summary = report().summary();
        assert_eq!(
            summary,
            ReportSummary {
                total: 4,
                succeeded: 1,
                failed: 1,
                skipped_blocked: 1,
                not_started: 1,
                awaiting_input: 1,
                resumed: 0,
            }
        );
        assert!(summary.to_string().starts_with("4 actions: 1 succeeded"));
    }

    #[test]
    fn json_document_round_trips() {
        let report = report();
        let back = ApplyReport::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.with_status(ActionStatus::Failed).count(), 1);
    }
}
