//! Dependency resolution
//!
//! Two edge sources:
//! - Declared: each `Action::requires` entry is linked to the action that
//!   produces that resource
//! - Structural: the last actions of each phase are linked to the first
//!   actions of the next non-empty phase when nothing already orders them

use crate::error::ValidationError;
use crate::graph;
use porter_core::{Action, ActionId, Phase, ResourceRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeOrigin {
    Declared,
    Structural,
}

/// `from` must succeed before `to` may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: ActionId,
    pub to: ActionId,
    pub origin: EdgeOrigin,
}

/// Output of [`DependencyResolver::resolve`]
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub edges: Vec<Edge>,
    /// Dangling references and cycles
    pub errors: Vec<ValidationError>,
}

/// Computes the edge set between actions
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    structural: bool,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    /// Resolver adding both declared and structural edges
    #[must_use]
    pub fn new() -> Self {
        Self { structural: true }
    }

    /// Only link declared requirements
    #[must_use]
    pub fn without_structural_edges(mut self) -> Self {
        self.structural = false;
        self
    }

    /// Fill `Action::dependencies` and return the edge set
    ///
    /// Structural edges are skipped when declared edges already contain a
    /// cycle, and never added where they would close one.
    pub fn resolve(&self, actions: &mut [Action]) -> Resolution {
        let mut resolution = Resolution::default();

        let mut producers: HashMap<ResourceRef, ActionId> = HashMap::with_capacity(actions.len());
        for action in actions.iter() {
            producers.entry(action.produces()).or_insert(action.id);
        }

        for action in actions.iter_mut() {
            for required in &action.requires {
                match producers.get(required) {
                    Some(&producer) => {
                        if action.dependencies.insert(producer) {
                            resolution.edges.push(Edge {
                                from: producer,
                                to: action.id,
                                origin: EdgeOrigin::Declared,
                            });
                        }
                    }
                    None => resolution.errors.push(ValidationError::DanglingReference {
                        action: action.id,
                        missing: required.clone(),
                    }),
                }
            }
        }

        let cycles = graph::find_cycles(actions);
        if !cycles.is_empty() {
            debug!(cycles = cycles.len(), "skipping structural edges");
            resolution.errors.extend(cycles);
        } else if self.structural {
            resolution.edges.extend(structural_edges(actions));
        }

        resolution.edges.sort();
        resolution
    }
}

fn structural_edges(actions: &mut [Action]) -> Vec<Edge> {
    let position: HashMap<ActionId, usize> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id, i))
        .collect();
    let mut deps: HashMap<ActionId, BTreeSet<ActionId>> = actions
        .iter()
        .map(|a| (a.id, a.dependencies.clone()))
        .collect();
    let mut dependents: HashMap<ActionId, BTreeSet<ActionId>> =
        actions.iter().map(|a| (a.id, BTreeSet::new())).collect();
    for action in actions.iter() {
        for dep in &action.dependencies {
            if let Some(set) = dependents.get_mut(dep) {
                set.insert(action.id);
            }
        }
    }

    let mut by_phase: BTreeMap<Phase, Vec<ActionId>> = BTreeMap::new();
    for action in actions.iter() {
        by_phase.entry(action.phase).or_default().push(action.id);
    }
    let phases: Vec<(&Phase, &Vec<ActionId>)> = by_phase.iter().collect();

    let mut added = Vec::new();
    for window in phases.windows(2) {
        let (current, next) = (window[0].1, window[1].1);
        let current_set: HashSet<ActionId> = current.iter().copied().collect();
        let next_set: HashSet<ActionId> = next.iter().copied().collect();

        let sinks: Vec<ActionId> = current
            .iter()
            .copied()
            .filter(|a| !dependents[a].iter().any(|d| current_set.contains(d)))
            .collect();
        let entries: Vec<ActionId> = next
            .iter()
            .copied()
            .filter(|a| !deps[a].iter().any(|d| next_set.contains(d)))
            .collect();

        for sink in sinks {
            let mut after = reachable(sink, &dependents);
            let before = reachable(sink, &deps);
            for &entry in &entries {
                if after.contains(&entry) || before.contains(&entry) {
                    continue;
                }
                if let Some(set) = deps.get_mut(&entry) {
                    set.insert(sink);
                }
                if let Some(set) = dependents.get_mut(&sink) {
                    set.insert(entry);
                }
                after.insert(entry);
                after.extend(reachable(entry, &dependents));
                added.push(Edge {
                    from: sink,
                    to: entry,
                    origin: EdgeOrigin::Structural,
                });
            }
        }
    }

    for edge in &added {
        if let Some(&i) = position.get(&edge.to) {
            actions[i].dependencies.insert(edge.from);
        }
    }
    debug!(edges = added.len(), "structural edges added");
    added
}

/// Nodes reachable from `start` (excluding it) along `adjacency`
fn reachable(start: ActionId, adjacency: &HashMap<ActionId, BTreeSet<ActionId>>) -> HashSet<ActionId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for next in adjacency.get(&node).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    seen.remove(&start);
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_core::{ActionKind, ActionStatus, IdempotencyKeyer};
    use serde_json::json;

    fn action(id: u32, kind: ActionKind, source: &str, requires: &[(&str, &str)]) -> Action {
        Action {
            id: ActionId(id),
            kind,
            source_id: source.to_string(),
            phase: kind.phase(),
            parameters: json!({}),
            requires: requires
                .iter()
                .map(|(t, i)| ResourceRef::new(*t, *i))
                .collect(),
            dependencies: BTreeSet::new(),
            idempotency_key: IdempotencyKeyer::new().key(kind, source, &json!({})),
            requires_user_input: false,
            user_input_prompts: Vec::new(),
            status: ActionStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn declared_edges_follow_producers() {
        let mut actions = vec![
            action(0, ActionKind::RepositoryCreate, "app", &[]),
            action(1, ActionKind::LabelCreate, "bug", &[("repository", "app")]),
            action(2, ActionKind::IssueCreate, "1", &[("label", "bug"), ("repository", "app")]),
        ];
        let resolution = DependencyResolver::new()
            .without_structural_edges()
            .resolve(&mut actions);

        assert!(resolution.errors.is_empty());
        assert_eq!(resolution.edges.len(), 3);
        assert_eq!(
            actions[2].dependencies,
            BTreeSet::from([ActionId(0), ActionId(1)])
        );
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut actions = vec![action(0, ActionKind::IssueCreate, "1", &[("label", "ghost")])];
        let resolution = DependencyResolver::new().resolve(&mut actions);
        assert_eq!(
            resolution.errors,
            vec![ValidationError::DanglingReference {
                action: ActionId(0),
                missing: ResourceRef::new("label", "ghost"),
            }]
        );
    }

    #[test]
    fn structural_edges_link_phase_boundaries() {
        let mut actions = vec![
            action(0, ActionKind::RepositoryCreate, "app", &[]),
            action(1, ActionKind::RepositoryPush, "app", &[("repository", "app")]),
            action(2, ActionKind::WorkflowCommit, "ci", &[("repository", "app")]),
        ];
        let resolution = DependencyResolver::new().resolve(&mut actions);

        assert!(resolution.edges.contains(&Edge {
            from: ActionId(1),
            to: ActionId(2),
            origin: EdgeOrigin::Structural,
        }));
        assert!(actions[2].dependencies.contains(&ActionId(1)));
    }

    #[test]
    fn structural_edges_skip_ordered_pairs() {
        let mut actions = vec![
            action(0, ActionKind::RepositoryCreate, "app", &[]),
            action(1, ActionKind::LabelCreate, "bug", &[("repository", "app")]),
        ];
        let resolution = DependencyResolver::new().resolve(&mut actions);
        assert!(resolution
            .edges
            .iter()
            .all(|e| e.origin == EdgeOrigin::Declared));
    }

    #[test]
    fn structural_edges_never_close_a_cycle() {
        // a label (issue-import) required by the repository's settings (foundation)
        let mut actions = vec![
            action(0, ActionKind::RepositoryCreate, "app", &[]),
            action(1, ActionKind::RepositorySettings, "app", &[("label", "bug")]),
            action(2, ActionKind::LabelCreate, "bug", &[("repository", "app")]),
        ];
        let resolution = DependencyResolver::new().resolve(&mut actions);
        assert!(resolution.errors.is_empty());
        assert!(graph::topological_order(&actions).is_some());
    }
}
