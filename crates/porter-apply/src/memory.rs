//! In-memory target platform
//!
//! Deterministic stand-in for a real API used by simulated applies and tests.
//! Record ids derive from the resource and request content, so repeated runs
//! over the same plan produce the same ids regardless of dispatch order.
//!
//! Faults are scripted per resource: fail a number of times, fail always,
//! or answer with a rate-limit signal. Calls can be delayed to exercise
//! timeouts and concurrency.

use crate::client::{ApiResponse, RateLimitStatus, TargetClient};
use crate::error::ApiError;
use async_trait::async_trait;
use parking_lot::Mutex;
use porter_core::canonical_json;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    Create,
    Put,
}

/// Scripted failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with an HTTP-class status
    Status(u16),
    /// Client-side timeout
    Timeout,
    /// Connection failure
    Transport,
    /// Explicit rate-limit signal
    RateLimited(Duration),
}

impl Fault {
    fn to_error(&self) -> ApiError {
        match self {
            Self::Status(code) => ApiError::status(*code, format!("simulated status {code}")),
            Self::Timeout => ApiError::Timeout,
            Self::Transport => ApiError::Transport("simulated connection reset".into()),
            Self::RateLimited(reset_after) => ApiError::RateLimited {
                reset_after: *reset_after,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    resource: String,
    fault: Fault,
    /// `None` fails forever
    remaining: Option<u32>,
}

/// One observed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub operation: Operation,
    pub resource: String,
    pub at: Instant,
    pub failed: bool,
}

#[derive(Debug)]
struct RateWindow {
    limit: u32,
    window: Duration,
    used: u32,
    started: Instant,
}

impl RateWindow {
    fn status(&mut self, now: Instant) -> Result<RateLimitStatus, ApiError> {
        if now >= self.started + self.window {
            self.started = now;
            self.used = 0;
        }
        let reset_after = (self.started + self.window).saturating_duration_since(now);
        if self.used >= self.limit {
            return Err(ApiError::RateLimited { reset_after });
        }
        self.used += 1;
        Ok(RateLimitStatus {
            remaining: self.limit - self.used,
            reset_after,
        })
    }
}

#[derive(Debug, Default)]
struct TargetState {
    records: BTreeMap<String, BTreeMap<String, Value>>,
    faults: Vec<FaultRule>,
    latency: HashMap<String, Duration>,
    calls: Vec<CallRecord>,
    rate: Option<RateWindow>,
}

/// Target platform held in memory
#[derive(Debug, Default)]
pub struct InMemoryTarget {
    state: Mutex<TargetState>,
}

impl InMemoryTarget {
    /// Empty target with no faults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` writes to `resource`
    #[must_use]
    pub fn fail_times(self, resource: &str, times: u32, fault: Fault) -> Self {
        self.push_fault(resource, fault, Some(times));
        self
    }

    /// Fail every write to `resource`
    #[must_use]
    pub fn fail_always(self, resource: &str, fault: Fault) -> Self {
        self.push_fault(resource, fault, None);
        self
    }

    /// Rate-limit the next write to `resource` with the given reset delay
    #[must_use]
    pub fn rate_limit_once(self, resource: &str, reset_after: Duration) -> Self {
        self.fail_times(resource, 1, Fault::RateLimited(reset_after))
    }

    /// Delay every call to `resource`
    #[must_use]
    pub fn with_latency(self, resource: &str, latency: Duration) -> Self {
        self.state.lock().latency.insert(resource.to_string(), latency);
        self
    }

    /// Enforce a global window of `limit` calls per `window`
    #[must_use]
    pub fn with_rate_window(self, limit: u32, window: Duration) -> Self {
        self.state.lock().rate = Some(RateWindow {
            limit,
            window,
            used: 0,
            started: Instant::now(),
        });
        self
    }

    /// Pre-populate a record; returns its id
    pub fn seed(&self, resource: &str, mut record: Value) -> String {
        let id = record_id(resource, &record);
        if let Value::Object(map) = &mut record {
            map.insert("id".into(), Value::String(id.clone()));
        }
        self.state
            .lock()
            .records
            .entry(resource.to_string())
            .or_default()
            .insert(id.clone(), record);
        id
    }

    fn push_fault(&self, resource: &str, fault: Fault, remaining: Option<u32>) {
        self.state.lock().faults.push(FaultRule {
            resource: resource.to_string(),
            fault,
            remaining,
        });
    }

    /// Records stored under `resource`
    #[must_use]
    pub fn records(&self, resource: &str) -> Vec<Value> {
        self.state
            .lock()
            .records
            .get(resource)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of stored records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().records.values().map(BTreeMap::len).sum()
    }

    /// Every call observed so far
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of one operation on one resource
    #[must_use]
    pub fn call_count(&self, operation: Operation, resource: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.resource == resource)
            .count()
    }

    async fn enter(
        &self,
        operation: Operation,
        resource: &str,
    ) -> Result<Option<RateLimitStatus>, ApiError> {
        let latency = self.state.lock().latency.get(resource).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        let window = state.rate.as_mut().map(|w| w.status(now));
        let rate = match window {
            Some(Ok(status)) => Some(status),
            Some(Err(err)) => {
                state.calls.push(CallRecord {
                    operation,
                    resource: resource.to_string(),
                    at: now,
                    failed: true,
                });
                return Err(err);
            }
            None => None,
        };

        let fault = if operation == Operation::Find {
            None
        } else {
            state
                .faults
                .iter_mut()
                .find(|rule| rule.resource == resource && rule.remaining != Some(0))
                .map(|rule| {
                    if let Some(n) = rule.remaining.as_mut() {
                        *n -= 1;
                    }
                    rule.fault.to_error()
                })
        };

        state.calls.push(CallRecord {
            operation,
            resource: resource.to_string(),
            at: now,
            failed: fault.is_some(),
        });
        match fault {
            Some(err) => Err(err),
            None => Ok(rate),
        }
    }
}

fn record_id(resource: &str, body: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(resource.as_bytes());
    hasher.update(&[0]);
    hasher.update(canonical_json(body).as_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    format!("{resource}-{}", &digest[..12])
}

fn matches(record: &Value, query: &Value) -> bool {
    match query {
        Value::Object(fields) => fields.iter().all(|(k, v)| record.get(k) == Some(v)),
        _ => false,
    }
}

#[async_trait]
impl TargetClient for InMemoryTarget {
    async fn find(&self, resource: &str, query: &Value) -> Result<ApiResponse, ApiError> {
        let rate = self.enter(Operation::Find, resource).await?;
        let state = self.state.lock();
        let found = state
            .records
            .get(resource)
            .and_then(|records| records.values().find(|r| matches(r, query)))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(ApiResponse::ok(found).with_rate_limit(rate))
    }

    async fn create(&self, resource: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let rate = self.enter(Operation::Create, resource).await?;
        let id = record_id(resource, body);
        let mut record = body.clone();
        if let Value::Object(map) = &mut record {
            map.insert("id".into(), Value::String(id.clone()));
        }
        let mut state = self.state.lock();
        let records = state.records.entry(resource.to_string()).or_default();
        if records.contains_key(&id) {
            return Err(ApiError::status(409, format!("{resource} {id} already exists")));
        }
        records.insert(id, record.clone());
        Ok(ApiResponse {
            status: 201,
            body: record,
            rate_limit: rate,
        })
    }

    async fn put(&self, resource: &str, key: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let rate = self.enter(Operation::Put, resource).await?;
        let id = format!("{resource}-{key}");
        let mut record = body.clone();
        if let Value::Object(map) = &mut record {
            map.insert("id".into(), Value::String(id.clone()));
        }
        self.state
            .lock()
            .records
            .entry(resource.to_string())
            .or_default()
            .insert(id, record.clone());
        Ok(ApiResponse::ok(record).with_rate_limit(rate))
    }
}
