//! Error types for the apply engine
//!
//! - [`ApiError`]: what a target client reports
//! - [`ExecutionError`]: how an executor classifies a failure for retry decisions
//! - [`CheckpointError`]: checkpoint store failures (fatal to a run)
//! - [`ApplyError`]: everything that stops a run before it can report

use crate::client::RateLimitStatus;
use porter_core::{ActionKind, ResourceRef, TransitionError};
use porter_plan::ValidationError;
use std::time::Duration;

/// Target platform API failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response within the client's own deadline
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP-class status
    #[error("status {code}: {message}")]
    Status {
        code: u16,
        message: String,
        rate_limit: Option<RateLimitStatus>,
    },

    /// Explicit rate-limit signal
    #[error("rate limited, resets in {reset_after:?}")]
    RateLimited { reset_after: Duration },
}

impl ApiError {
    /// Status error without rate-limit headers
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
            rate_limit: None,
        }
    }

    /// Whether a later attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Status { code, .. } => matches!(code, 408 | 429 | 500..=599),
        }
    }

    /// Delay until the rate-limit window resets, when this is a rate-limit signal
    #[must_use]
    pub fn rate_limit_reset(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { reset_after } => Some(*reset_after),
            Self::Status {
                code: 429,
                rate_limit,
                ..
            } => Some(rate_limit.map_or(Duration::from_secs(60), |r| r.reset_after)),
            _ => None,
        }
    }

    /// Rate-limit headers carried by the error
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimitStatus> {
        match self {
            Self::Status { rate_limit, .. } => *rate_limit,
            Self::RateLimited { reset_after } => Some(RateLimitStatus {
                remaining: 0,
                reset_after: *reset_after,
            }),
            _ => None,
        }
    }
}

/// Executor failure, classified for the engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Timeout, 5xx, transport: retried with backoff up to the attempt cap
    #[error("{message}")]
    Retryable { message: String, detail: String },

    /// Permission denied, conflict, invalid parameters: never retried
    #[error("{message}")]
    Terminal { message: String, detail: String },

    /// Rate-limit exhausted: pauses dispatch without consuming an attempt
    #[error("rate limit exhausted, resets in {reset_after:?}")]
    RateLimited { reset_after: Duration, detail: String },
}

impl ExecutionError {
    /// Terminal failure with no upstream detail
    pub fn terminal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Terminal {
            detail: message.clone(),
            message,
        }
    }

    /// Retryable failure with no upstream detail
    pub fn retryable(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Retryable {
            detail: message.clone(),
            message,
        }
    }

    /// Classify an API failure during `operation`
    #[must_use]
    pub fn from_api(operation: &str, error: &ApiError) -> Self {
        let detail = error.to_string();
        if let Some(reset_after) = error.rate_limit_reset() {
            return Self::RateLimited {
                reset_after,
                detail,
            };
        }
        let message = format!("{operation} failed: {detail}");
        if error.is_retryable() {
            Self::Retryable { message, detail }
        } else {
            Self::Terminal { message, detail }
        }
    }

    /// Reference that could not be resolved from the id map
    #[must_use]
    pub fn unresolved(reference: &ResourceRef) -> Self {
        Self::terminal(format!("no target id recorded for {reference}"))
    }

    /// Retryable or rate-limited
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Terminal { .. })
    }

    /// Upstream failure detail
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Retryable { detail, .. }
            | Self::Terminal { detail, .. }
            | Self::RateLimited { detail, .. } => detail,
        }
    }

    /// Demote to terminal once retries are exhausted
    #[must_use]
    pub fn exhausted(self, attempts: u32) -> Self {
        let detail = self.detail().to_string();
        Self::Terminal {
            message: format!("giving up after {attempts} attempts: {self}"),
            detail,
        }
    }
}

/// Checkpoint store failure
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Fatal apply failure
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Plan failed validation
    #[error("plan is not runnable: {} validation errors", .0.len())]
    InvalidPlan(Vec<ValidationError>),

    /// No executor registered for a kind present in the plan
    #[error("no executor registered for {0}")]
    MissingExecutor(ActionKind),

    /// Checkpoint read or write failed
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Engine attempted an illegal status change
    #[error("engine state error: {0}")]
    Transition(#[from] TransitionError),

    /// Worker task did not complete
    #[error("worker task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        for code in [408, 429, 500, 502, 503] {
            assert!(ApiError::status(code, "x").is_retryable(), "{code}");
        }
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(!ApiError::status(code, "x").is_retryable(), "{code}");
        }
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn rate_limits_are_distinguished() {
        let limited = ExecutionError::from_api(
            "create webhook",
            &ApiError::RateLimited {
                reset_after: Duration::from_secs(5),
            },
        );
        assert!(matches!(
            limited,
            ExecutionError::RateLimited { reset_after, .. } if reset_after == Duration::from_secs(5)
        ));

        let status_429 = ExecutionError::from_api("create", &ApiError::status(429, "slow down"));
        assert!(matches!(status_429, ExecutionError::RateLimited { .. }));
    }

    #[test]
    fn terminal_keeps_upstream_detail() {
        let err = ExecutionError::from_api("protect main", &ApiError::status(403, "forbidden"));
        assert!(!err.is_retryable());
        assert_eq!(err.detail(), "status 403: forbidden");
        assert_eq!(err.to_string(), "protect main failed: status 403: forbidden");
    }

    #[test]
    fn exhausted_retry_becomes_terminal() {
        let err = ExecutionError::retryable("timeout").exhausted(3);
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("giving up after 3 attempts"));
    }
}
