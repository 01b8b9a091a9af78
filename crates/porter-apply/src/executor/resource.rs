use super::{ActionExecutor, ExecutionResult};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use async_trait::async_trait;
use porter_core::placeholder::{collect_user_inputs, resolve_refs};
use porter_core::{Action, ActionKind};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Body field stamped with the action's idempotency key
pub const KEY_MARKER: &str = "_idempotency_key";
/// Body field stamped with the action's source id
pub const SOURCE_MARKER: &str = "_source_id";

/// How an executor writes its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Look up first, create when absent
    ///
    /// Lookup uses the natural-key field when the body carries it, the
    /// idempotency marker otherwise.
    Create { natural_key: Option<&'static str> },
    /// Create-or-replace at a key taken from a body field, or the source id
    Put { key_field: Option<&'static str> },
}

impl WriteMode {
    /// Mode used by the standard registry
    #[must_use]
    pub const fn for_kind(kind: ActionKind) -> Self {
        use ActionKind as K;
        match kind {
            K::RepositoryPush | K::LfsPush | K::RepositorySettings | K::WikiPush => {
                Self::Put { key_field: None }
            }
            K::VariableSet | K::SecretSet => Self::Put {
                key_field: Some("name"),
            },
            K::WorkflowCommit => Self::Put {
                key_field: Some("path"),
            },
            K::BranchProtectionSet => Self::Put {
                key_field: Some("branch"),
            },
            K::CollaboratorAdd => Self::Put {
                key_field: Some("login"),
            },
            K::RepositoryCreate | K::EnvironmentCreate | K::LabelCreate | K::TeamCreate => {
                Self::Create {
                    natural_key: Some("name"),
                }
            }
            K::MilestoneCreate | K::DeployKeyAdd => Self::Create {
                natural_key: Some("title"),
            },
            K::ReleaseCreate => Self::Create {
                natural_key: Some("tag_name"),
            },
            K::WebhookCreate => Self::Create {
                natural_key: Some("url"),
            },
            K::IssueCreate
            | K::CommentAdd
            | K::PrCreate
            | K::PrCommentAdd
            | K::PrReviewAdd
            | K::ReleaseAssetUpload
            | K::PackagePublish
            | K::ArchiveUpload
            | K::SourceLinkComment => Self::Create { natural_key: None },
        }
    }
}

/// Generic adapter: resolve references, then find-or-create or put
#[derive(Debug, Clone, Copy)]
pub struct ResourceExecutor {
    kind: ActionKind,
    mode: WriteMode,
}

impl ResourceExecutor {
    #[must_use]
    pub const fn new(kind: ActionKind, mode: WriteMode) -> Self {
        Self { kind, mode }
    }

    /// Executor with the standard mode for `kind`
    #[must_use]
    pub const fn for_kind(kind: ActionKind) -> Self {
        Self::new(kind, WriteMode::for_kind(kind))
    }

    #[must_use]
    pub const fn mode(&self) -> WriteMode {
        self.mode
    }

    async fn apply(&self, action: &Action, ctx: &ExecutionContext) -> Result<String, ExecutionError> {
        let produced = action.produces();
        if let Some(existing) = ctx.lookup(&produced) {
            debug!(action = %action.id, %produced, "already recorded");
            return Ok(existing);
        }

        let resolved = resolve_refs(&action.parameters, &|r| ctx.lookup(r))
            .map_err(|r| ExecutionError::unresolved(&r))?;
        if let Some(prompt) = collect_user_inputs(&resolved).into_iter().next() {
            return Err(ExecutionError::terminal(format!("missing user input: {prompt}")));
        }
        let body = stamp(resolved, action);
        let resource = self.kind.resource_type();

        let id = match self.mode {
            WriteMode::Create { natural_key } => {
                let query = match natural_key.and_then(|field| body.get(field).map(|v| (field, v))) {
                    Some((field, value)) => json!({ field: value }),
                    None => json!({ KEY_MARKER: action.idempotency_key.as_str() }),
                };
                let found = ctx
                    .find(resource, &query)
                    .await
                    .map_err(|e| ExecutionError::from_api(&format!("find {resource}"), &e))?;
                if let Some(id) = found.record_id() {
                    debug!(action = %action.id, %id, "adopted existing record");
                    id
                } else {
                    ctx.create(resource, &body)
                        .await
                        .map_err(|e| ExecutionError::from_api(&format!("create {resource}"), &e))?
                        .record_id()
                        .ok_or_else(|| {
                            ExecutionError::terminal(format!("create {resource} returned no id"))
                        })?
                }
            }
            WriteMode::Put { key_field } => {
                let key = key_field
                    .and_then(|field| body.get(field))
                    .and_then(Value::as_str)
                    .unwrap_or(&action.source_id)
                    .to_string();
                ctx.put(resource, &key, &body)
                    .await
                    .map_err(|e| ExecutionError::from_api(&format!("put {resource}/{key}"), &e))?
                    .record_id()
                    .unwrap_or(key)
            }
        };

        ctx.record_id(produced, id.clone())?;
        Ok(id)
    }
}

#[async_trait]
impl ActionExecutor for ResourceExecutor {
    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> ExecutionResult {
        self.apply(action, ctx).await.into()
    }
}

/// Add idempotency markers; non-object parameters are wrapped under `value`
fn stamp(parameters: Value, action: &Action) -> Value {
    let mut map = match parameters {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    map.insert(KEY_MARKER.into(), Value::String(action.idempotency_key.to_string()));
    map.insert(SOURCE_MARKER.into(), Value::String(action.source_id.clone()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, MemoryCheckpointStore};
    use crate::error::ApiError;
    use crate::memory::{Fault, InMemoryTarget, Operation};
    use porter_core::placeholder::reference;
    use porter_core::{ActionId, IdempotencyKeyer, ResourceRef};
    use std::sync::Arc;

    fn action(kind: ActionKind, source_id: &str, parameters: Value) -> Action {
        Action {
            id: ActionId(0),
            kind,
            source_id: source_id.into(),
            phase: kind.phase(),
            idempotency_key: IdempotencyKeyer::new().key(kind, source_id, &parameters),
            parameters,
            requires: Vec::new(),
            dependencies: Default::default(),
            requires_user_input: false,
            user_input_prompts: Vec::new(),
            status: Default::default(),
            attempt_count: 0,
            last_error: None,
        }
    }

    fn context(target: Arc<InMemoryTarget>) -> ExecutionContext {
        ExecutionContext::new(target, Arc::new(MemoryCheckpointStore::new()), Checkpoint::new("fp"))
    }

    #[tokio::test]
    async fn second_call_does_not_create_again() {
        let target = Arc::new(InMemoryTarget::new());
        let ctx = context(target.clone());
        let issue = action(ActionKind::IssueCreate, "7", json!({"title": "crash"}));
        let exec = ResourceExecutor::for_kind(ActionKind::IssueCreate);

        let first = exec.execute(&issue, &ctx).await;
        assert!(first.succeeded);

        // lost id map, marker lookup still finds the record
        let ctx = context(target.clone());
        let second = exec.execute(&issue, &ctx).await;
        assert_eq!(second.produced_id, first.produced_id);
        assert_eq!(target.record_count(), 1);
        assert_eq!(target.call_count(Operation::Create, "issue"), 1);
    }

    #[tokio::test]
    async fn existing_record_is_adopted_by_natural_key() {
        let target = Arc::new(InMemoryTarget::new());
        let seeded = target.seed("label", json!({"name": "bug", "color": "ff0000"}));
        let ctx = context(target.clone());
        let label = action(ActionKind::LabelCreate, "bug", json!({"name": "bug"}));

        let result = ResourceExecutor::for_kind(ActionKind::LabelCreate)
            .execute(&label, &ctx)
            .await;
        assert_eq!(result.produced_id.as_deref(), Some(seeded.as_str()));
        assert_eq!(ctx.lookup(&ResourceRef::new("label", "bug")), Some(seeded));
        assert_eq!(target.call_count(Operation::Create, "label"), 0);
    }

    #[tokio::test]
    async fn references_resolve_from_id_map() {
        let target = Arc::new(InMemoryTarget::new());
        let ctx = context(target.clone());
        let comment = action(
            ActionKind::CommentAdd,
            "7#comment-0",
            json!({"issue": reference("issue", "7"), "body": "same here"}),
        );
        let exec = ResourceExecutor::for_kind(ActionKind::CommentAdd);

        let unresolved = exec.execute(&comment, &ctx).await;
        assert!(!unresolved.succeeded && !unresolved.retryable);

        ctx.record_id(ResourceRef::new("issue", "7"), "issue-42".into()).unwrap();
        assert!(exec.execute(&comment, &ctx).await.succeeded);
        assert_eq!(target.records("issue_comment")[0]["issue"], "issue-42");
    }

    #[tokio::test]
    async fn put_keys_on_field_and_classifies_status() {
        let target = Arc::new(InMemoryTarget::new().fail_times("ci_variable", 1, Fault::Status(503)));
        let ctx = context(target.clone());
        let var = action(ActionKind::VariableSet, "CI_ENV", json!({"name": "CI_ENV", "value": "prod"}));
        let exec = ResourceExecutor::for_kind(ActionKind::VariableSet);

        let first = exec.execute(&var, &ctx).await;
        assert!(first.retryable);
        assert_eq!(first.error.unwrap().detail(), ApiError::status(503, "simulated status 503").to_string());

        let second = exec.execute(&var, &ctx).await;
        assert_eq!(second.produced_id.as_deref(), Some("ci_variable-CI_ENV"));
    }

    #[tokio::test]
    async fn unfilled_user_input_is_terminal() {
        let ctx = context(Arc::new(InMemoryTarget::new()));
        let secret = action(
            ActionKind::SecretSet,
            "TOKEN",
            json!({"name": "TOKEN", "value": porter_core::placeholder::user_input("value for secret TOKEN")}),
        );
        let result = ResourceExecutor::for_kind(ActionKind::SecretSet)
            .execute(&secret, &ctx)
            .await;
        assert!(!result.retryable);
        assert!(result.error.unwrap().to_string().contains("value for secret TOKEN"));
    }
}
