use porter_core::{ActionId, Entity, EntityCatalog, EntityType};
use porter_plan::{graph, PlanGenerator, ValidationError};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

const TYPES: [EntityType; 5] = [
    EntityType::Label,
    EntityType::Milestone,
    EntityType::Issue,
    EntityType::Release,
    EntityType::Webhook,
];

/// Entities where each may reference any earlier one, so declared
/// references never form a cycle.
fn arb_acyclic_entities() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(
        (0..TYPES.len(), prop::collection::vec(any::<prop::sample::Index>(), 0..3), 0..3usize),
        1..24,
    )
    .prop_map(|specs| {
        let mut entities: Vec<Entity> = Vec::new();
        for (i, (type_idx, refs, comments)) in specs.into_iter().enumerate() {
            let entity_type = TYPES[type_idx];
            let comments: Vec<_> = (0..comments).map(|c| json!(format!("comment {c}"))).collect();
            let mut entity = Entity::new(
                entity_type,
                format!("e{i}"),
                json!({"title": format!("entity {i}"), "comments": comments}),
            );
            if i > 0 {
                for r in refs {
                    let target = &entities[r.index(i)];
                    entity = entity.with_reference(target.entity_type, target.id.clone());
                }
            }
            entities.push(entity);
        }
        let mut with_repo = vec![Entity::new(
            EntityType::Repository,
            "app",
            json!({"name": "app", "bundle": "app.bundle"}),
        )];
        with_repo.extend(entities);
        with_repo
    })
}

proptest! {
    #[test]
    fn prop_acyclic_catalog_yields_dag(entities in arb_acyclic_entities()) {
        let catalog = EntityCatalog::new("prop", entities).unwrap();
        let plan = PlanGenerator::new().generate(&catalog).unwrap();

        prop_assert!(plan.is_runnable(), "{:?}", plan.validation().errors);
        prop_assert!(graph::find_cycles(plan.actions()).is_empty());

        let order = plan.linear_view();
        prop_assert_eq!(order.len(), plan.len());
        let position: HashMap<ActionId, usize> =
            order.iter().enumerate().map(|(i, a)| (a.id, i)).collect();
        for action in plan.actions() {
            for dep in &action.dependencies {
                prop_assert!(position[dep] < position[&action.id]);
            }
        }
    }

    #[test]
    fn prop_generation_is_deterministic(entities in arb_acyclic_entities()) {
        let mut reversed = entities.clone();
        reversed.reverse();

        let generator = PlanGenerator::new();
        let a = generator.generate(&EntityCatalog::new("prop", entities).unwrap()).unwrap();
        let b = generator.generate(&EntityCatalog::new("prop", reversed).unwrap()).unwrap();

        let keys = |p: &porter_plan::Plan| -> BTreeSet<String> {
            p.actions().iter().map(|a| a.idempotency_key.to_string()).collect()
        };
        prop_assert_eq!(keys(&a), keys(&b));
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn crafted_cycle_is_reported_and_not_runnable() {
    let catalog = EntityCatalog::new(
        "cyclic",
        vec![
            Entity::new(EntityType::Repository, "app", json!({})),
            Entity::new(EntityType::Milestone, "v1", json!({}))
                .with_reference(EntityType::Issue, "1"),
            Entity::new(EntityType::Issue, "1", json!({}))
                .with_reference(EntityType::Milestone, "v1"),
        ],
    )
    .unwrap();
    let plan = PlanGenerator::new().generate(&catalog).unwrap();

    assert!(!plan.is_runnable());
    let cycles: Vec<_> = plan
        .validation()
        .errors
        .iter()
        .filter_map(|e| match e {
            ValidationError::Cycle { path } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cycles.len(), 1);

    let milestone = plan
        .actions()
        .iter()
        .find(|a| a.source_id == "v1")
        .map(|a| a.id)
        .unwrap();
    let issue = plan
        .actions()
        .iter()
        .find(|a| a.source_id == "1")
        .map(|a| a.id)
        .unwrap();
    let members: BTreeSet<_> = cycles[0].iter().copied().collect();
    assert_eq!(members, BTreeSet::from([milestone, issue]));
}

#[test]
fn plan_document_is_inspectable() {
    let catalog = EntityCatalog::from_json(
        r#"{
            "source": "gitlab:group/app",
            "entities": [
                {"type": "repository", "id": "app", "payload": {"name": "app", "bundle": "app.bundle"}},
                {"type": "ci_workflow", "id": "build", "payload": {"path": ".github/workflows/build.yml"}},
                {"type": "ci_secret", "id": "TOKEN", "payload": {"name": "TOKEN"}}
            ]
        }"#,
    )
    .unwrap();
    let plan = PlanGenerator::new().generate(&catalog).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();

    assert_eq!(doc["validation"]["ok"], true);
    assert_eq!(doc["stats"]["total"], 4);
    assert_eq!(doc["stats"]["by_phase"]["ci-setup"], 2);
    assert_eq!(doc["stats"]["requires_user_input"].as_array().unwrap().len(), 1);
    assert!(doc["edges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["origin"] == "structural"));

    let action = &doc["actions"][0];
    assert!(action.get("idempotency_key").is_some());
    for run_state in ["status", "attempt_count", "last_error"] {
        assert!(action.get(run_state).is_none(), "{run_state} leaked into the plan");
    }
}
