//! Plan generation
//!
//! `generate(catalog)`:
//! 1. Emit actions per entity, keyed by [`IdempotencyKeyer`]
//! 2. Resolve declared and structural dependencies
//! 3. Validate: cycles, dangling references, duplicate keys and producers
//! 4. Derive the stable linear order and phase groups
//! 5. Flag actions whose parameters still need operator input
//!
//! Data-shaped problems end up in the plan's validation report. Only a catalog
//! that cannot be read at all is an error.

use crate::emit::emit;
use crate::error::PlanError;
use crate::graph;
use crate::plan::Plan;
use crate::resolver::DependencyResolver;
use porter_core::placeholder::{collect_refs, collect_user_inputs, substitute_identities};
use porter_core::{
    Action, ActionId, ActionKind, ActionStatus, EntityCatalog, EntityType, IdempotencyKeyer,
    ResourceRef,
};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Turns an entity catalog into a [`Plan`]
#[derive(Debug, Clone, Default)]
pub struct PlanGenerator {
    keyer: IdempotencyKeyer,
    resolver: DependencyResolver,
}

impl PlanGenerator {
    /// Generator with default resolver settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Generate a plan from a catalog document
    ///
    /// # Errors
    /// Returns error if the document is not a readable catalog
    pub fn generate_from_json(&self, json: &str) -> Result<Plan, PlanError> {
        let catalog = EntityCatalog::from_json(json)?;
        self.generate(&catalog)
    }

    /// Generate a plan
    ///
    /// # Errors
    /// - `PlanError::MalformedEntity` when a payload breaks its emission rule
    /// - `PlanError::TooManyActions` when ids overflow
    #[instrument(skip_all, fields(source = catalog.source(), entities = catalog.len()))]
    pub fn generate(&self, catalog: &EntityCatalog) -> Result<Plan, PlanError> {
        let identities = catalog.identity_map();
        let repository = catalog.repository().map(|repo| {
            ResourceRef::new(ActionKind::RepositoryCreate.resource_type(), repo.id.clone())
        });

        let mut actions: Vec<Action> = Vec::new();
        for entity in catalog.iter() {
            for (n, draft) in emit(entity, catalog)?.into_iter().enumerate() {
                let id = next_id(actions.len())?;
                let mut parameters = draft.parameters;

                let unmapped = substitute_identities(&mut parameters, &identities);
                if !unmapped.is_empty() {
                    debug!(action = %id, ?unmapped, "unmapped identities");
                }

                let mut requires: BTreeSet<ResourceRef> = draft.requires.into_iter().collect();
                if entity.entity_type != EntityType::Repository {
                    requires.extend(repository.iter().cloned());
                }
                if n == 0 {
                    requires.extend(entity.references.iter().map(porter_core::EntityRef::to_resource));
                }
                requires.extend(collect_refs(&parameters));

                let prompts = collect_user_inputs(&parameters);
                let idempotency_key = self.keyer.key(draft.kind, &draft.source_id, &parameters);

                actions.push(Action {
                    id,
                    kind: draft.kind,
                    source_id: draft.source_id,
                    phase: draft.kind.phase(),
                    parameters,
                    requires: requires.into_iter().collect(),
                    dependencies: BTreeSet::new(),
                    idempotency_key,
                    requires_user_input: !prompts.is_empty(),
                    user_input_prompts: prompts,
                    status: ActionStatus::Pending,
                    attempt_count: 0,
                    last_error: None,
                });
            }
        }

        let resolution = self.resolver.resolve(&mut actions);
        let mut errors = resolution.errors;
        errors.extend(graph::find_duplicates(&actions));

        let plan = Plan::assemble(catalog.source(), actions, resolution.edges, errors);
        if plan.is_runnable() {
            info!(
                actions = plan.len(),
                edges = plan.edges().len(),
                user_input = plan.stats().requires_user_input.len(),
                "plan generated"
            );
        } else {
            for error in &plan.validation().errors {
                warn!(%error, "plan validation");
            }
        }
        Ok(plan)
    }
}

fn next_id(len: usize) -> Result<ActionId, PlanError> {
    u32::try_from(len)
        .map(ActionId)
        .map_err(|_| PlanError::TooManyActions { max: u32::MAX })
}
