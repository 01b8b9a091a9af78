//! Run-scoped execution context
//!
//! The only state shared between concurrently running executors:
//! - `id_map`: source resource → target id, write-once per key
//! - `rate_budget`: remaining call allowance and reset time
//! - `checkpoint`: progress snapshot persisted after every success
//!
//! All mutation goes through one mutex. Checkpoint persistence is driven by
//! the engine's owner loop, so writes are serialized.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::client::{ApiResponse, RateLimitStatus, TargetClient};
use crate::error::{ApiError, CheckpointError, ExecutionError};
use parking_lot::Mutex;
use porter_core::{ActionId, IdempotencyKey, ResourceRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Source resource → target id
///
/// Serializes as a JSON object keyed `"type:id"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap(BTreeMap<ResourceRef, String>);

impl IdMap {
    /// Empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target id for a resource
    #[must_use]
    pub fn get(&self, resource: &ResourceRef) -> Option<&str> {
        self.0.get(resource).map(String::as_str)
    }

    /// Record a target id
    ///
    /// Re-recording the same id is a no-op.
    ///
    /// # Errors
    /// Returns the existing id when a different one is already recorded
    pub fn insert(&mut self, resource: ResourceRef, target: String) -> Result<(), String> {
        match self.0.get(&resource) {
            Some(existing) if *existing == target => Ok(()),
            Some(existing) => Err(existing.clone()),
            None => {
                self.0.insert(resource, target);
                Ok(())
            }
        }
    }

    /// Whether a resource has a target id
    #[must_use]
    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.0.contains_key(resource)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in resource order
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceRef, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Entries of one resource type
    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.0
            .iter()
            .filter(move |(k, _)| k.resource_type == resource_type)
            .map(|(k, v)| (k.id.as_str(), v.as_str()))
    }
}

impl Serialize for IdMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k.to_string(), v)))
    }
}

impl<'de> Deserialize<'de> for IdMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, target)| {
                let (resource_type, id) = key.split_once(':').ok_or_else(|| {
                    serde::de::Error::custom(format!("id map key {key:?} is not type:id"))
                })?;
                Ok((ResourceRef::new(resource_type, id), target))
            })
            .collect::<Result<BTreeMap<_, _>, D::Error>>()
            .map(IdMap)
    }
}

/// Remaining call allowance for the target API
///
/// Unknown until the target reports a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateBudget {
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
}

impl RateBudget {
    /// Adopt the window reported by a response
    pub fn observe(&mut self, status: RateLimitStatus, now: Instant) {
        self.remaining = Some(status.remaining);
        self.reset_at = Some(now + status.reset_after);
    }

    /// Treat the budget as empty until `until`
    pub fn exhaust_until(&mut self, until: Instant) {
        self.remaining = Some(0);
        self.reset_at = Some(self.reset_at.map_or(until, |at| at.max(until)));
    }

    /// Account for one dispatched action
    pub fn consume(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// When dispatch must wait, the instant the window resets
    ///
    /// A window whose reset time has passed is forgotten.
    pub fn wait_until(&mut self, now: Instant, reserve: u32) -> Option<Instant> {
        match (self.remaining, self.reset_at) {
            (_, Some(reset)) if reset <= now => {
                *self = Self::default();
                None
            }
            (Some(remaining), Some(reset)) if remaining <= reserve => Some(reset),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ContextState {
    id_map: IdMap,
    rate: RateBudget,
    checkpoint: Checkpoint,
}

/// Shared, internally synchronized run state
pub struct ExecutionContext {
    client: Arc<dyn TargetClient>,
    store: Arc<dyn CheckpointStore>,
    state: Mutex<ContextState>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Context seeded from a checkpoint (fresh or restored)
    pub fn new(
        client: Arc<dyn TargetClient>,
        store: Arc<dyn CheckpointStore>,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            client,
            store,
            state: Mutex::new(ContextState {
                id_map: checkpoint.id_map.clone(),
                rate: RateBudget::default(),
                checkpoint,
            }),
        }
    }

    /// Target id recorded for a resource
    #[must_use]
    pub fn lookup(&self, resource: &ResourceRef) -> Option<String> {
        self.state.lock().id_map.get(resource).map(str::to_string)
    }

    /// Record a produced id (write-once)
    ///
    /// # Errors
    /// Terminal error when a different id is already recorded
    pub fn record_id(&self, resource: ResourceRef, target: String) -> Result<(), ExecutionError> {
        let display = resource.to_string();
        self.state
            .lock()
            .id_map
            .insert(resource, target.clone())
            .map_err(|existing| {
                ExecutionError::terminal(format!(
                    "{display} already maps to {existing}, refusing {target}"
                ))
            })
    }

    /// Snapshot of the id map
    #[must_use]
    pub fn id_map(&self) -> IdMap {
        self.state.lock().id_map.clone()
    }

    /// Snapshot of the rate budget
    #[must_use]
    pub fn rate_budget(&self) -> RateBudget {
        self.state.lock().rate
    }

    /// Snapshot of the last checkpoint
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.state.lock().checkpoint.clone()
    }

    /// Instant new dispatch may resume, if the budget is at or below `reserve`
    pub fn rate_gate(&self, reserve: u32) -> Option<Instant> {
        self.state.lock().rate.wait_until(Instant::now(), reserve)
    }

    /// Account for one dispatch
    pub fn consume_budget(&self) {
        self.state.lock().rate.consume();
    }

    /// Pause dispatch until `until`
    pub fn pause_until(&self, until: Instant) {
        self.state.lock().rate.exhaust_until(until);
    }

    /// Record a completed action and persist the checkpoint
    ///
    /// # Errors
    /// Returns error if the store rejects the write
    pub fn commit(&self, action: ActionId, key: IdempotencyKey) -> Result<(), CheckpointError> {
        let snapshot = {
            let mut state = self.state.lock();
            let id_map = state.id_map.clone();
            let checkpoint = &mut state.checkpoint;
            checkpoint.executed.insert(key);
            checkpoint.last_completed = Some(action);
            checkpoint.id_map = id_map;
            checkpoint.updated_at = chrono::Utc::now();
            checkpoint.clone()
        };
        self.store.save(&snapshot)?;
        debug!(%action, executed = snapshot.executed.len(), "checkpoint saved");
        Ok(())
    }

    /// Persist the current checkpoint with the latest id map
    ///
    /// # Errors
    /// Returns error if the store rejects the write
    pub fn flush(&self) -> Result<(), CheckpointError> {
        let snapshot = {
            let mut state = self.state.lock();
            state.checkpoint.id_map = state.id_map.clone();
            state.checkpoint.updated_at = chrono::Utc::now();
            state.checkpoint.clone()
        };
        self.store.save(&snapshot)
    }

    /// Look up an existing record
    ///
    /// # Errors
    /// Propagates the client error
    pub async fn find(&self, resource: &str, query: &Value) -> Result<ApiResponse, ApiError> {
        let result = self.client.find(resource, query).await;
        self.observe(&result);
        result
    }

    /// Create a record
    ///
    /// # Errors
    /// Propagates the client error
    pub async fn create(&self, resource: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let result = self.client.create(resource, body).await;
        self.observe(&result);
        result
    }

    /// Create or replace the record at `key`
    ///
    /// # Errors
    /// Propagates the client error
    pub async fn put(&self, resource: &str, key: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let result = self.client.put(resource, key, body).await;
        self.observe(&result);
        result
    }

    fn observe(&self, result: &Result<ApiResponse, ApiError>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        match result {
            Ok(response) => {
                if let Some(status) = response.rate_limit {
                    state.rate.observe(status, now);
                }
            }
            Err(error) => {
                if let Some(reset_after) = error.rate_limit_reset() {
                    warn!(?reset_after, "target rate limit exhausted");
                    state.rate.exhaust_until(now + reset_after);
                } else if let Some(status) = error.rate_limit() {
                    state.rate.observe(status, now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::memory::InMemoryTarget;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> (ExecutionContext, MemoryCheckpointStore) {
        let store = MemoryCheckpointStore::new();
        let ctx = ExecutionContext::new(
            Arc::new(InMemoryTarget::new()),
            Arc::new(store.clone()),
            Checkpoint::new("fp"),
        );
        (ctx, store)
    }

    #[test]
    fn id_map_is_write_once() {
        let (ctx, _) = context();
        let label = ResourceRef::new("label", "bug");
        ctx.record_id(label.clone(), "L1".into()).unwrap();
        ctx.record_id(label.clone(), "L1".into()).unwrap();
        assert!(ctx.record_id(label.clone(), "L2".into()).is_err());
        assert_eq!(ctx.lookup(&label).as_deref(), Some("L1"));
    }

    #[test]
    fn id_map_serializes_as_object() {
        let mut map = IdMap::new();
        map.insert(ResourceRef::new("issue_comment", "7#comment-0"), "C9".into())
            .unwrap();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, json!({"issue_comment:7#comment-0": "C9"}));
        let back: IdMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
        assert!(serde_json::from_value::<IdMap>(json!({"nocolon": "x"})).is_err());
    }

    #[test]
    fn commit_persists_id_map_and_key() {
        let (ctx, store) = context();
        ctx.record_id(ResourceRef::new("label", "bug"), "L1".into()).unwrap();
        let key = porter_core::IdempotencyKeyer::new().key(
            porter_core::ActionKind::LabelCreate,
            "bug",
            &json!({}),
        );
        ctx.commit(ActionId(1), key.clone()).unwrap();

        let saved = store.latest().unwrap();
        assert_eq!(saved.last_completed, Some(ActionId(1)));
        assert!(saved.executed.contains(&key));
        assert_eq!(saved.id_map.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_gates_until_reset() {
        let mut budget = RateBudget::default();
        let now = Instant::now();
        assert_eq!(budget.wait_until(now, 0), None);

        budget.observe(
            RateLimitStatus {
                remaining: 1,
                reset_after: Duration::from_secs(30),
            },
            now,
        );
        assert_eq!(budget.wait_until(now, 0), None);
        assert_eq!(budget.wait_until(now, 1), Some(now + Duration::from_secs(30)));

        budget.consume();
        assert_eq!(budget.wait_until(now, 0), Some(now + Duration::from_secs(30)));
        assert_eq!(budget.wait_until(now + Duration::from_secs(30), 0), None);
        assert_eq!(budget.remaining, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_error_pauses_dispatch() {
        let target = InMemoryTarget::new().rate_limit_once("webhook", Duration::from_secs(5));
        let ctx = ExecutionContext::new(
            Arc::new(target),
            Arc::new(MemoryCheckpointStore::new()),
            Checkpoint::new("fp"),
        );
        assert!(ctx.create("webhook", &json!({})).await.is_err());
        let gate = ctx.rate_gate(0).unwrap();
        assert_eq!(gate, Instant::now() + Duration::from_secs(5));
    }
}
