//! Testing utilities for the Porter workspace
//!
//! Shared catalogs, plan builders and engine helpers.

#![allow(missing_docs)]

use porter_apply::{
    ApplyConfig, ApplyEngine, InMemoryTarget, MemoryCheckpointStore, ProgressEvent, RetryPolicy,
};
use porter_core::placeholder::reference;
use porter_core::{Action, ActionId, ActionKind, ActionStatus, Entity, EntityCatalog, EntityType};
use porter_plan::{Plan, PlanGenerator};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const SOURCE: &str = "gitlab:group/app";

pub fn repository() -> Entity {
    Entity::new(EntityType::Repository, "app", json!({"name": "app"}))
}

pub fn catalog(entities: Vec<Entity>) -> EntityCatalog {
    EntityCatalog::new(SOURCE, entities).unwrap()
}

/// Repository, two labels, one issue labelled with both
pub fn labelled_issue_catalog() -> EntityCatalog {
    catalog(vec![
        repository(),
        Entity::new(EntityType::Label, "bug", json!({"name": "bug", "color": "d73a4a"})),
        Entity::new(EntityType::Label, "ui", json!({"name": "ui", "color": "0075ca"})),
        Entity::new(
            EntityType::Issue,
            "1",
            json!({
                "title": "Crash on start",
                "labels": [reference("label", "bug"), reference("label", "ui")]
            }),
        ),
    ])
}

/// Repository plus one webhook
pub fn webhook_catalog() -> EntityCatalog {
    catalog(vec![
        repository(),
        Entity::new(
            EntityType::Webhook,
            "ci-hook",
            json!({"url": "https://ci.example.com/hook", "events": ["push"]}),
        ),
    ])
}

/// Repository, a release and a branch protection rule
pub fn release_and_protection_catalog() -> EntityCatalog {
    catalog(vec![
        repository(),
        Entity::new(
            EntityType::Release,
            "v1.0.0",
            json!({"tag_name": "v1.0.0", "name": "First", "assets": ["app.tar.gz"]}),
        ),
        Entity::new(
            EntityType::BranchProtection,
            "main",
            json!({"branch": "main", "required_reviews": 1}),
        ),
    ])
}

/// One of most entity types, wired the way an export would be
pub fn migration_catalog() -> EntityCatalog {
    catalog(vec![
        Entity::new(
            EntityType::Repository,
            "app",
            json!({
                "name": "app",
                "bundle": "exports/app.bundle",
                "default_branch": "main",
                "lfs": true,
                "lfs_objects": 12,
                "settings": {"wiki": true, "issues": true}
            }),
        ),
        Entity::new(
            EntityType::IdentityMapping,
            "alice",
            json!({"target": "alice-gh", "confirmed": true}),
        ),
        Entity::new(EntityType::Environment, "production", json!({"name": "production"})),
        Entity::new(EntityType::CiVariable, "DEPLOY_ENV", json!({"name": "DEPLOY_ENV", "value": "prod"}))
            .with_reference(EntityType::Environment, "production"),
        Entity::new(EntityType::CiSecret, "API_TOKEN", json!({"name": "API_TOKEN", "value": "redacted"})),
        Entity::new(
            EntityType::CiWorkflow,
            "build",
            json!({"path": ".github/workflows/build.yml", "content": "on: push"}),
        ),
        Entity::new(EntityType::Label, "bug", json!({"name": "bug"})),
        Entity::new(EntityType::Label, "ui", json!({"name": "ui"})),
        Entity::new(EntityType::Milestone, "v1", json!({"title": "v1"})),
        Entity::new(
            EntityType::Issue,
            "1",
            json!({
                "title": "Crash on start",
                "assignee": {"$identity": "alice"},
                "labels": [reference("label", "bug")],
                "milestone": reference("milestone", "v1"),
                "comments": ["reproduced", {"body": "fixed on main"}]
            }),
        ),
        Entity::new(
            EntityType::Issue,
            "2",
            json!({"title": "Dark mode", "labels": [reference("label", "ui")]}),
        ),
        Entity::new(
            EntityType::PullRequest,
            "5",
            json!({
                "title": "Fix crash",
                "head": "fix-crash",
                "base": "main",
                "comments": ["looks good"],
                "reviews": [{"state": "approved", "body": "ship it"}]
            }),
        )
        .with_reference(EntityType::Issue, "1"),
        Entity::new(EntityType::Wiki, "wiki", json!({"bundle": "exports/app.wiki.bundle"})),
        Entity::new(
            EntityType::Release,
            "v1.0.0",
            json!({"tag_name": "v1.0.0", "name": "First", "assets": ["app.tar.gz", "app.zip"]}),
        ),
        Entity::new(EntityType::Package, "app-npm", json!({"name": "app", "version": "1.0.0"})),
        Entity::new(EntityType::BranchProtection, "main", json!({"branch": "main"})),
        Entity::new(EntityType::Team, "core", json!({"name": "core"})),
        Entity::new(EntityType::Collaborator, "alice", json!({"login": {"$identity": "alice"}}))
            .with_reference(EntityType::Team, "core"),
        Entity::new(
            EntityType::Webhook,
            "ci-hook",
            json!({"url": "https://ci.example.com/hook"}),
        ),
        Entity::new(EntityType::DeployKey, "deploy", json!({"title": "deploy", "key": "ssh-ed25519 AAAA"})),
        Entity::new(
            EntityType::ProjectArchive,
            "snapshot",
            json!({"path": "exports/app.tar", "link_issues": true}),
        ),
    ])
}

/// Repository and a secret whose value the source cannot export
pub fn secret_catalog() -> EntityCatalog {
    catalog(vec![
        repository(),
        Entity::new(EntityType::CiSecret, "API_TOKEN", json!({"name": "API_TOKEN"})),
        Entity::new(
            EntityType::CiWorkflow,
            "deploy",
            json!({"path": ".github/workflows/deploy.yml", "secret": reference("ci_secret", "API_TOKEN")}),
        ),
    ])
}

/// Prompt the generator attaches to a secret without a value
pub fn secret_prompt(name: &str) -> String {
    format!("value for secret {name}")
}

pub fn plan(catalog: &EntityCatalog) -> Plan {
    let plan = PlanGenerator::new().generate(catalog).unwrap();
    assert!(plan.is_runnable(), "{:?}", plan.validation().errors);
    plan
}

pub fn find(plan: &Plan, kind: ActionKind, source_id: &str) -> Action {
    plan.actions()
        .iter()
        .find(|a| a.kind == kind && a.source_id == source_id)
        .cloned()
        .unwrap_or_else(|| panic!("no {kind} action for {source_id}"))
}

/// Retries without real waiting
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(3)
        .with_delays(Duration::from_millis(10), Duration::from_millis(40))
        .with_jitter(0.0)
}

pub fn fast_config() -> ApplyConfig {
    ApplyConfig::new()
        .with_retry(fast_retry())
        .with_call_timeout(Duration::from_secs(5))
}

/// Engine over `plan` with fast retries
pub fn engine(plan: Plan, target: &Arc<InMemoryTarget>, store: &MemoryCheckpointStore) -> ApplyEngine {
    ApplyEngine::new(plan, target.clone(), Arc::new(store.clone())).with_config(fast_config())
}

/// Check that no action went running before all its dependencies succeeded
///
/// # Panics
/// Panics naming the first violating action
pub fn assert_dependency_order(plan: &Plan, events: &[ProgressEvent]) {
    let mut status: HashMap<ActionId, ActionStatus> = HashMap::new();
    for event in events {
        if event.is_dispatch() {
            let action = plan.action(event.action).unwrap();
            for dep in &action.dependencies {
                assert_eq!(
                    status.get(dep),
                    Some(&ActionStatus::Succeeded),
                    "{} started before dependency {dep}",
                    action.label()
                );
            }
        }
        status.insert(event.action, event.to);
    }
}

const ARB_TYPES: [EntityType; 6] = [
    EntityType::Label,
    EntityType::Milestone,
    EntityType::Issue,
    EntityType::Release,
    EntityType::Webhook,
    EntityType::Team,
];

/// Catalogs whose references point only at earlier entities
pub fn arb_acyclic_catalog() -> impl Strategy<Value = EntityCatalog> {
    prop::collection::vec(
        (0..ARB_TYPES.len(), prop::collection::vec(any::<prop::sample::Index>(), 0..3), 0..3usize),
        1..16,
    )
    .prop_map(|specs| {
        let mut entities = vec![Entity::new(
            EntityType::Repository,
            "app",
            json!({"name": "app", "bundle": "app.bundle"}),
        )];
        for (i, (type_idx, refs, comments)) in specs.into_iter().enumerate() {
            let comments: Vec<_> = (0..comments).map(|c| json!(format!("comment {c}"))).collect();
            let mut entity = Entity::new(
                ARB_TYPES[type_idx],
                format!("e{i}"),
                json!({"name": format!("e{i}"), "title": format!("entity {i}"), "comments": comments}),
            );
            if i > 0 {
                for r in refs {
                    let target = &entities[1 + r.index(i)];
                    entity = entity.with_reference(target.entity_type, target.id.clone());
                }
            }
            entities.push(entity);
        }
        catalog(entities)
    })
}
