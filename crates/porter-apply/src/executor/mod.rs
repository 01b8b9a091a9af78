//! Action executors
//!
//! One thin adapter per [`ActionKind`], looked up in an [`ExecutorRegistry`].
//! Executors hold no state of their own; everything they read or write goes
//! through the [`ExecutionContext`].

mod resource;

pub use resource::{ResourceExecutor, WriteMode, KEY_MARKER, SOURCE_MARKER};

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use async_trait::async_trait;
use porter_core::{Action, ActionKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one executor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    /// Target id of the produced resource
    pub produced_id: Option<String>,
    pub retryable: bool,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// Successful call that produced `id`
    #[must_use]
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            produced_id: Some(id.into()),
            retryable: false,
            error: None,
        }
    }

    /// Failed call, classified by the error
    #[must_use]
    pub fn failure(error: ExecutionError) -> Self {
        Self {
            succeeded: false,
            produced_id: None,
            retryable: error.is_retryable(),
            error: Some(error),
        }
    }
}

impl From<Result<String, ExecutionError>> for ExecutionResult {
    fn from(result: Result<String, ExecutionError>) -> Self {
        match result {
            Ok(id) => Self::success(id),
            Err(error) => Self::failure(error),
        }
    }
}

/// Performs the remote operation for one action kind
///
/// Must be safe to call twice for the same idempotency key: check the id map
/// or the target before creating anything.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> ExecutionResult;
}

/// Executors keyed by action kind
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.executors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("kinds", &kinds).finish()
    }
}

impl ExecutorRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`ResourceExecutor`] for every kind
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for &kind in ActionKind::ALL {
            registry.register(kind, Arc::new(ResourceExecutor::for_kind(kind)));
        }
        registry
    }

    /// Register or replace the executor for `kind`
    pub fn register(&mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    #[must_use]
    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// First kind in `kinds` with no executor
    pub fn missing(&self, kinds: impl IntoIterator<Item = ActionKind>) -> Option<ActionKind> {
        kinds.into_iter().find(|k| !self.executors.contains_key(k))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = ExecutorRegistry::standard();
        assert_eq!(registry.len(), ActionKind::ALL.len());
        assert_eq!(registry.missing(ActionKind::ALL.iter().copied()), None);
    }

    #[test]
    fn missing_kind_is_reported() {
        let registry = ExecutorRegistry::new().with(
            ActionKind::LabelCreate,
            Arc::new(ResourceExecutor::for_kind(ActionKind::LabelCreate)),
        );
        assert_eq!(
            registry.missing([ActionKind::LabelCreate, ActionKind::IssueCreate]),
            Some(ActionKind::IssueCreate)
        );
    }

    #[test]
    fn failure_result_carries_classification() {
        let result = ExecutionResult::failure(ExecutionError::retryable("502"));
        assert!(!result.succeeded && result.retryable);
        let result: ExecutionResult = Err::<String, _>(ExecutionError::terminal("403")).into();
        assert!(!result.retryable);
    }
}
