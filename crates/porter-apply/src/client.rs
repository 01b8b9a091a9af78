//! Target platform client boundary
//!
//! The engine never speaks a wire protocol. Executors go through
//! [`TargetClient`], which surfaces a status class and the current
//! rate-limit window with every response.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Rate-limit window reported by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Calls left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Successful API response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Record returned by the call; `Null` when a lookup found nothing
    pub body: Value,
    pub rate_limit: Option<RateLimitStatus>,
}

impl ApiResponse {
    /// 200 response with a body
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            rate_limit: None,
        }
    }

    /// Attach rate-limit headers
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitStatus>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Target id of the returned record (`id` field, string or number)
    #[must_use]
    pub fn record_id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Calls against the target platform
///
/// `resource` is the id-map namespace of the produced resource (`"label"`,
/// `"issue_comment"`, ...); mapping that to concrete endpoints is the
/// client's concern.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Look up an existing record whose fields match every field of `query`
    async fn find(&self, resource: &str, query: &Value) -> Result<ApiResponse, ApiError>;

    /// Create a new record
    async fn create(&self, resource: &str, body: &Value) -> Result<ApiResponse, ApiError>;

    /// Create or replace the record at `key`
    async fn put(&self, resource: &str, key: &str, body: &Value) -> Result<ApiResponse, ApiError>;
}
