//! Progress events
//!
//! The engine emits one [`ProgressEvent`] per action status transition, in
//! the order the owner loop applies them. Sequence numbers are gap-free
//! within a run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use porter_core::{ActionId, ActionKind, ActionStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub action: ActionId,
    pub kind: ActionKind,
    pub from: ActionStatus,
    pub to: ActionStatus,
    /// Attempts counted so far
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Whether this transition started an attempt
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.from == ActionStatus::Ready && self.to == ActionStatus::Running
    }
}

/// External consumer of progress events
///
/// Called from the engine's owner loop; implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far, in emission order
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.inner.lock().clone()
    }

    /// Events for one action
    #[must_use]
    pub fn for_action(&self, action: ActionId) -> Vec<ProgressEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.inner.lock().push(event);
    }
}

/// Writes each event as a tracing line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.to {
            ActionStatus::Failed => tracing::warn!(
                action = %event.action,
                kind = %event.kind,
                attempt = event.attempt,
                error = event.error.as_deref().unwrap_or(""),
                "action failed"
            ),
            to => tracing::info!(
                action = %event.action,
                kind = %event.kind,
                from = %event.from,
                %to,
                attempt = event.attempt,
                "action transition"
            ),
        }
    }
}

/// Forwards events to a tokio channel
///
/// A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Sink plus the receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}
