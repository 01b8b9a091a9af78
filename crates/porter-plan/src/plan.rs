//! The Plan artifact
//!
//! Immutable once assembled. Serializes to an inspectable JSON document that
//! the apply engine loads back with [`Plan::from_json`].

use crate::error::{PlanError, ValidationError};
use crate::graph;
use crate::resolver::Edge;
use porter_core::{canonical_digest, Action, ActionId, IdempotencyKey, Phase};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Plan document format version
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// Actions of one phase, ascending id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseGroup {
    pub phase: Phase,
    pub actions: Vec<ActionId>,
}

/// Outcome of plan validation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

/// Summary statistics
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanStats {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_phase: BTreeMap<String, usize>,
    /// Actions gated on operator input
    pub requires_user_input: Vec<ActionId>,
}

impl PlanStats {
    fn compute(actions: &[Action]) -> Self {
        let mut stats = Self {
            total: actions.len(),
            ..Self::default()
        };
        for action in actions {
            *stats.by_kind.entry(action.kind.as_str().to_string()).or_default() += 1;
            *stats.by_phase.entry(action.phase.as_str().to_string()).or_default() += 1;
            if action.requires_user_input {
                stats.requires_user_input.push(action.id);
            }
        }
        stats
    }

    /// Whether any action needs operator input
    #[inline]
    #[must_use]
    pub fn any_requires_user_input(&self) -> bool {
        !self.requires_user_input.is_empty()
    }
}

/// Validated, dependency-annotated set of actions for one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    format_version: u32,
    source: String,
    fingerprint: String,
    actions: Vec<Action>,
    edges: Vec<Edge>,
    phases: Vec<PhaseGroup>,
    /// Advisory linear order; empty when the graph has a cycle
    order: Vec<ActionId>,
    validation: ValidationReport,
    stats: PlanStats,
}

impl Plan {
    pub(crate) fn assemble(
        source: &str,
        mut actions: Vec<Action>,
        edges: Vec<Edge>,
        errors: Vec<ValidationError>,
    ) -> Self {
        actions.sort_by_key(|a| a.id);
        let validation = ValidationReport::from_errors(errors);
        let order = if validation.ok {
            graph::topological_order(&actions).unwrap_or_default()
        } else {
            Vec::new()
        };

        Self {
            format_version: PLAN_FORMAT_VERSION,
            source: source.to_string(),
            fingerprint: fingerprint(&actions),
            phases: phase_groups(&actions),
            stats: PlanStats::compute(&actions),
            actions,
            edges,
            order,
            validation,
        }
    }

    /// Source label of the catalog this plan was generated from
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Hash over action keys and their dependencies' keys
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Actions by ascending id
    #[inline]
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Dependency edges
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Phase grouping in execution order, empty phases omitted
    #[inline]
    #[must_use]
    pub fn phase_groups(&self) -> &[PhaseGroup] {
        &self.phases
    }

    /// Validation outcome
    #[inline]
    #[must_use]
    pub fn validation(&self) -> &ValidationReport {
        &self.validation
    }

    /// Summary statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    /// Whether the plan passed validation and may be applied
    #[inline]
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.validation.ok
    }

    /// Number of actions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the plan has no actions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Action by id
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|i| &self.actions[i])
    }

    /// Action by idempotency key
    #[must_use]
    pub fn action_by_key(&self, key: &IdempotencyKey) -> Option<&Action> {
        self.actions.iter().find(|a| &a.idempotency_key == key)
    }

    /// Actions in the advisory topological order
    #[must_use]
    pub fn linear_view(&self) -> Vec<&Action> {
        self.order.iter().filter_map(|id| self.action(*id)).collect()
    }

    /// Actions flagged as needing operator input
    pub fn requires_user_input(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.requires_user_input)
    }

    /// Direct dependents of every action
    #[must_use]
    pub fn dependents(&self) -> BTreeMap<ActionId, Vec<ActionId>> {
        let mut map: BTreeMap<ActionId, Vec<ActionId>> =
            self.actions.iter().map(|a| (a.id, Vec::new())).collect();
        for action in &self.actions {
            for dep in &action.dependencies {
                if let Some(list) = map.get_mut(dep) {
                    list.push(action.id);
                }
            }
        }
        map
    }

    /// Pretty JSON document
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a plan document and re-check its graph
    ///
    /// A document whose stored report says `ok` but whose graph is broken is
    /// loaded as invalid.
    ///
    /// # Errors
    /// Returns error on malformed JSON or an unsupported format version
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let mut plan: Plan = serde_json::from_str(json)?;
        if plan.format_version != PLAN_FORMAT_VERSION {
            return Err(PlanError::malformed(
                "plan",
                format!("unsupported format version {}", plan.format_version),
            ));
        }
        plan.actions.sort_by_key(|a| a.id);

        let mut errors = plan.validation.errors.clone();
        for error in graph::check(&plan.actions) {
            if !errors.contains(&error) {
                errors.push(error);
            }
        }
        plan.validation = ValidationReport::from_errors(errors);
        if plan.validation.ok {
            plan.order = graph::topological_order(&plan.actions).unwrap_or_default();
        } else {
            plan.order.clear();
        }
        plan.fingerprint = fingerprint(&plan.actions);
        Ok(plan)
    }
}

fn phase_groups(actions: &[Action]) -> Vec<PhaseGroup> {
    let mut groups: BTreeMap<Phase, Vec<ActionId>> = BTreeMap::new();
    for action in actions {
        groups.entry(action.phase).or_default().push(action.id);
    }
    groups
        .into_iter()
        .map(|(phase, mut actions)| {
            actions.sort_unstable();
            PhaseGroup { phase, actions }
        })
        .collect()
}

fn fingerprint(actions: &[Action]) -> String {
    let keys: BTreeMap<ActionId, &str> = actions
        .iter()
        .map(|a| (a.id, a.idempotency_key.as_str()))
        .collect();
    let mut entries: Vec<Value> = actions
        .iter()
        .map(|a| {
            let mut deps: Vec<&str> = a
                .dependencies
                .iter()
                .filter_map(|d| keys.get(d).copied())
                .collect();
            deps.sort_unstable();
            json!([a.idempotency_key.as_str(), deps])
        })
        .collect();
    entries.sort_by_key(|e| e[0].as_str().map(str::to_string));
    canonical_digest(&Value::Array(entries))
}
