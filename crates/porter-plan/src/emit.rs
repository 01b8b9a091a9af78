//! Per-entity emission rules
//!
//! Turns one catalog entity into zero or more action drafts. Drafts carry the
//! kind, source id, parameters and any intra-entity requirements; ids, keys
//! and cross-entity dependencies are attached later by the generator.

use crate::error::PlanError;
use porter_core::placeholder::{reference, user_input};
use porter_core::{ActionKind, Entity, EntityCatalog, EntityType, ResourceRef};
use serde_json::{Map, Value};

/// An action before id assignment
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub(crate) kind: ActionKind,
    pub(crate) source_id: String,
    pub(crate) parameters: Value,
    pub(crate) requires: Vec<ResourceRef>,
}

impl Draft {
    fn new(kind: ActionKind, source_id: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            parameters,
            requires: Vec::new(),
        }
    }

    fn requiring(mut self, kind: ActionKind, source_id: &str) -> Self {
        self.requires
            .push(ResourceRef::new(kind.resource_type(), source_id));
        self
    }
}

/// Emit drafts for one entity, primary action first
pub(crate) fn emit(entity: &Entity, catalog: &EntityCatalog) -> Result<Vec<Draft>, PlanError> {
    let id = entity.id.as_str();
    let drafts = match entity.entity_type {
        EntityType::Repository => repository(entity),
        EntityType::Issue => with_children(
            entity,
            ActionKind::IssueCreate,
            &[("comments", ActionKind::CommentAdd, "comment")],
            "issue",
        )?,
        EntityType::PullRequest => with_children(
            entity,
            ActionKind::PrCreate,
            &[
                ("comments", ActionKind::PrCommentAdd, "comment"),
                ("reviews", ActionKind::PrReviewAdd, "review"),
            ],
            "pull_request",
        )?,
        EntityType::Release => with_children(
            entity,
            ActionKind::ReleaseCreate,
            &[("assets", ActionKind::ReleaseAssetUpload, "asset")],
            "release",
        )?,
        EntityType::ProjectArchive => archive(entity, catalog),
        EntityType::CiSecret => vec![secret(entity)],
        EntityType::IdentityMapping => Vec::new(),
        other => vec![Draft::new(primary_kind(other)?, id, entity.payload.clone())],
    };
    Ok(drafts)
}

fn primary_kind(entity_type: EntityType) -> Result<ActionKind, PlanError> {
    let kind = match entity_type {
        EntityType::Repository => ActionKind::RepositoryCreate,
        EntityType::Environment => ActionKind::EnvironmentCreate,
        EntityType::CiVariable => ActionKind::VariableSet,
        EntityType::CiSecret => ActionKind::SecretSet,
        EntityType::CiWorkflow => ActionKind::WorkflowCommit,
        EntityType::Label => ActionKind::LabelCreate,
        EntityType::Milestone => ActionKind::MilestoneCreate,
        EntityType::Issue => ActionKind::IssueCreate,
        EntityType::PullRequest => ActionKind::PrCreate,
        EntityType::Wiki => ActionKind::WikiPush,
        EntityType::Release => ActionKind::ReleaseCreate,
        EntityType::Package => ActionKind::PackagePublish,
        EntityType::BranchProtection => ActionKind::BranchProtectionSet,
        EntityType::Team => ActionKind::TeamCreate,
        EntityType::Collaborator => ActionKind::CollaboratorAdd,
        EntityType::Webhook => ActionKind::WebhookCreate,
        EntityType::DeployKey => ActionKind::DeployKeyAdd,
        EntityType::ProjectArchive => ActionKind::ArchiveUpload,
        EntityType::IdentityMapping => {
            return Err(PlanError::malformed(
                entity_type.as_str(),
                "identity mappings do not produce actions",
            ))
        }
    };
    Ok(kind)
}

fn repository(entity: &Entity) -> Vec<Draft> {
    let id = entity.id.as_str();
    let repo_ref = reference(ActionKind::RepositoryCreate.resource_type(), id);

    let mut drafts = vec![Draft::new(
        ActionKind::RepositoryCreate,
        id,
        without(&entity.payload, &["lfs", "lfs_objects", "settings", "bundle"]),
    )];

    // an exported repository without a bundle has no history to push
    let has_content = entity.field("bundle").is_some_and(|b| !b.is_null());
    let after_content = if has_content {
        let push = with_field(
            pick(&entity.payload, &["bundle", "default_branch"]),
            "repository",
            repo_ref.clone(),
        );
        drafts.push(Draft::new(ActionKind::RepositoryPush, id, push));
        ActionKind::RepositoryPush
    } else {
        ActionKind::RepositoryCreate
    };

    if entity.flag("lfs") {
        let lfs = with_field(
            pick(&entity.payload, &["lfs_objects"]),
            "repository",
            repo_ref.clone(),
        );
        drafts.push(Draft::new(ActionKind::LfsPush, id, lfs).requiring(after_content, id));
    }

    if let Some(settings) = entity.field("settings") {
        let mut params = Map::new();
        params.insert("repository".into(), repo_ref);
        params.insert("settings".into(), settings.clone());
        drafts.push(
            Draft::new(ActionKind::RepositorySettings, id, Value::Object(params))
                .requiring(after_content, id),
        );
    }

    drafts
}

/// Primary action plus one child per element of each listed array field
///
/// Child source ids are `<parent>#<label>-<index>` and each child carries a
/// `$ref` to its parent under `parent_field`.
fn with_children(
    entity: &Entity,
    primary: ActionKind,
    children: &[(&str, ActionKind, &str)],
    parent_field: &str,
) -> Result<Vec<Draft>, PlanError> {
    let id = entity.id.as_str();
    let fields: Vec<&str> = children.iter().map(|(field, _, _)| *field).collect();
    let mut drafts = vec![Draft::new(primary, id, without(&entity.payload, &fields))];
    let parent = reference(primary.resource_type(), id);

    for (field, kind, label) in children {
        match entity.field(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(PlanError::malformed(
                    format!("{}:{id}", entity.entity_type),
                    format!("`{field}` must be an array"),
                ))
            }
        }
        for (i, item) in entity.list(field).iter().enumerate() {
            let body = match item {
                Value::Object(map) => Value::Object(map.clone()),
                Value::String(text) => {
                    let mut map = Map::new();
                    map.insert("body".into(), Value::String(text.clone()));
                    Value::Object(map)
                }
                _ => {
                    return Err(PlanError::malformed(
                        format!("{}:{id}", entity.entity_type),
                        format!("`{field}[{i}]` must be an object or string"),
                    ))
                }
            };
            let params = with_field(body, parent_field, parent.clone());
            drafts.push(Draft::new(*kind, format!("{id}#{label}-{i}"), params));
        }
    }

    Ok(drafts)
}

fn archive(entity: &Entity, catalog: &EntityCatalog) -> Vec<Draft> {
    let id = entity.id.as_str();
    let mut drafts = vec![Draft::new(
        ActionKind::ArchiveUpload,
        id,
        without(&entity.payload, &["link_issues"]),
    )];

    if entity.flag("link_issues") {
        let issues: Vec<Value> = catalog
            .of_type(EntityType::Issue)
            .map(|issue| reference(ActionKind::IssueCreate.resource_type(), &issue.id))
            .collect();
        let mut params = Map::new();
        params.insert(
            "archive".into(),
            reference(ActionKind::ArchiveUpload.resource_type(), id),
        );
        params.insert("issues".into(), Value::Array(issues));
        drafts.push(Draft::new(
            ActionKind::SourceLinkComment,
            id,
            Value::Object(params),
        ));
    }

    drafts
}

/// Secret values are write-only on the source; absent values prompt the operator
fn secret(entity: &Entity) -> Draft {
    let mut params = entity.payload.clone();
    if let Value::Object(map) = &mut params {
        if !map.contains_key("value") {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(entity.id.as_str())
                .to_string();
            map.insert("value".into(), user_input(&format!("value for secret {name}")));
        }
    }
    Draft::new(ActionKind::SecretSet, entity.id.as_str(), params)
}

fn without(payload: &Value, fields: &[&str]) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn pick(payload: &Value, fields: &[&str]) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

fn with_field(mut value: Value, field: &str, field_value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert(field.to_string(), field_value);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_core::placeholder::collect_refs;
    use serde_json::json;

    fn catalog(entities: Vec<Entity>) -> EntityCatalog {
        EntityCatalog::new("test", entities).unwrap()
    }

    #[test]
    fn repository_emits_optional_steps() {
        let repo = Entity::new(
            EntityType::Repository,
            "app",
            json!({
                "name": "app",
                "bundle": "exports/app.bundle",
                "lfs": true,
                "settings": {"wiki": false}
            }),
        );
        let cat = catalog(vec![repo.clone()]);
        let kinds: Vec<_> = emit(&repo, &cat).unwrap().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::RepositoryCreate,
                ActionKind::RepositoryPush,
                ActionKind::LfsPush,
                ActionKind::RepositorySettings,
            ]
        );

        let plain = Entity::new(EntityType::Repository, "app", json!({"name": "app"}));
        let drafts = emit(&plain, &catalog(vec![plain.clone()])).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, ActionKind::RepositoryCreate);
    }

    #[test]
    fn issue_comments_become_children() {
        let issue = Entity::new(
            EntityType::Issue,
            "7",
            json!({"title": "crash", "comments": ["first", {"body": "second"}]}),
        );
        let drafts = emit(&issue, &catalog(vec![issue.clone()])).unwrap();

        assert_eq!(drafts.len(), 3);
        assert!(drafts[0].parameters.get("comments").is_none());
        assert_eq!(drafts[1].source_id, "7#comment-0");
        assert_eq!(drafts[1].parameters["body"], "first");
        assert_eq!(
            collect_refs(&drafts[2].parameters),
            vec![ResourceRef::new("issue", "7")]
        );
    }

    #[test]
    fn malformed_children_are_rejected() {
        let issue = Entity::new(EntityType::Issue, "7", json!({"comments": "nope"}));
        assert!(matches!(
            emit(&issue, &catalog(vec![issue.clone()])),
            Err(PlanError::MalformedEntity { .. })
        ));

        let pr = Entity::new(EntityType::PullRequest, "3", json!({"reviews": [42]}));
        assert!(emit(&pr, &catalog(vec![pr.clone()])).is_err());
    }

    #[test]
    fn archive_links_every_issue() {
        let archive = Entity::new(
            EntityType::ProjectArchive,
            "snapshot",
            json!({"link_issues": true}),
        );
        let cat = catalog(vec![
            archive.clone(),
            Entity::new(EntityType::Issue, "1", json!({})),
            Entity::new(EntityType::Issue, "2", json!({})),
        ]);
        let drafts = emit(&archive, &cat).unwrap();
        assert_eq!(drafts[1].kind, ActionKind::SourceLinkComment);
        let refs = collect_refs(&drafts[1].parameters);
        assert!(refs.contains(&ResourceRef::new("issue", "1")));
        assert!(refs.contains(&ResourceRef::new("issue", "2")));
    }

    #[test]
    fn secret_without_value_prompts() {
        let secret = Entity::new(EntityType::CiSecret, "TOKEN", json!({"name": "TOKEN"}));
        let drafts = emit(&secret, &catalog(vec![secret.clone()])).unwrap();
        assert_eq!(
            drafts[0].parameters["value"],
            user_input("value for secret TOKEN")
        );
    }

    #[test]
    fn identity_mappings_emit_nothing() {
        let mapping = Entity::new(
            EntityType::IdentityMapping,
            "alice",
            json!({"target": "alice", "confirmed": true}),
        );
        assert!(emit(&mapping, &catalog(vec![mapping.clone()])).unwrap().is_empty());
    }
}
