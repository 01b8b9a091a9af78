//! Action graph checks and ordering
//!
//! Edges run from a dependency to its dependent. The checks here only look at
//! `Action::dependencies`; resource-level problems are found by the resolver.

use crate::error::ValidationError;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use porter_core::{Action, ActionId, IdempotencyKey, Phase, ResourceRef};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

fn build_graph(actions: &[Action]) -> DiGraphMap<ActionId, ()> {
    let known: HashSet<ActionId> = actions.iter().map(|a| a.id).collect();
    let mut graph = DiGraphMap::with_capacity(actions.len(), actions.len() * 2);
    for action in actions {
        graph.add_node(action.id);
    }
    for action in actions {
        for dep in action.dependencies.iter().filter(|d| known.contains(d)) {
            graph.add_edge(*dep, action.id, ());
        }
    }
    graph
}

/// Every dependency cycle, one error per strongly connected component
#[must_use]
pub fn find_cycles(actions: &[Action]) -> Vec<ValidationError> {
    let graph = build_graph(actions);
    let mut cycles: Vec<Vec<ActionId>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| cycle_path(&graph, &scc))
        .collect();
    cycles.sort();
    cycles
        .into_iter()
        .map(|path| ValidationError::Cycle { path })
        .collect()
}

/// Concrete cycle through the smallest id of a strongly connected component
fn cycle_path(graph: &DiGraphMap<ActionId, ()>, scc: &[ActionId]) -> Vec<ActionId> {
    let members: HashSet<ActionId> = scc.iter().copied().collect();
    let Some(&start) = scc.iter().min() else {
        return Vec::new();
    };
    if graph.contains_edge(start, start) {
        return vec![start, start];
    }

    let mut parent: HashMap<ActionId, ActionId> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<ActionId> = graph
            .neighbors_directed(node, Direction::Outgoing)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_unstable();
        for n in next {
            if n == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[&cur];
                }
                path.push(start);
                path.reverse();
                return path;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(n) {
                slot.insert(node);
                queue.push_back(n);
            }
        }
    }

    let mut fallback = scc.to_vec();
    fallback.sort_unstable();
    fallback
}

/// Dependencies naming ids that are not in the action set
#[must_use]
pub fn find_unknown_dependencies(actions: &[Action]) -> Vec<ValidationError> {
    let known: HashSet<ActionId> = actions.iter().map(|a| a.id).collect();
    actions
        .iter()
        .flat_map(|a| {
            a.dependencies
                .iter()
                .filter(|d| !known.contains(d))
                .map(move |d| ValidationError::UnknownDependency {
                    action: a.id,
                    dependency: *d,
                })
        })
        .collect()
}

/// Shared idempotency keys and shared produced resources
#[must_use]
pub fn find_duplicates(actions: &[Action]) -> Vec<ValidationError> {
    let mut by_key: BTreeMap<&IdempotencyKey, Vec<ActionId>> = BTreeMap::new();
    let mut by_resource: BTreeMap<ResourceRef, Vec<ActionId>> = BTreeMap::new();
    for action in actions {
        by_key.entry(&action.idempotency_key).or_default().push(action.id);
        by_resource.entry(action.produces()).or_default().push(action.id);
    }

    let keys = by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, actions)| ValidationError::DuplicateKey {
            key: key.clone(),
            actions,
        });
    let resources = by_resource
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(resource, actions)| ValidationError::DuplicateProducer { resource, actions });

    keys.chain(resources).collect()
}

/// All graph-level checks: unknown ids, duplicates, cycles
#[must_use]
pub fn check(actions: &[Action]) -> Vec<ValidationError> {
    let mut errors = find_unknown_dependencies(actions);
    errors.extend(find_duplicates(actions));
    errors.extend(find_cycles(actions));
    errors
}

/// Stable topological order: ready actions are taken by ascending phase, then id
///
/// Returns `None` when the graph has a cycle.
#[must_use]
pub fn topological_order(actions: &[Action]) -> Option<Vec<ActionId>> {
    let known: HashMap<ActionId, Phase> = actions.iter().map(|a| (a.id, a.phase)).collect();
    let mut indegree: HashMap<ActionId, usize> = HashMap::with_capacity(actions.len());
    let mut dependents: HashMap<ActionId, Vec<ActionId>> = HashMap::new();

    for action in actions {
        let deps = action
            .dependencies
            .iter()
            .filter(|d| known.contains_key(d));
        let mut count = 0;
        for dep in deps {
            dependents.entry(*dep).or_default().push(action.id);
            count += 1;
        }
        indegree.insert(action.id, count);
    }

    let mut heap: BinaryHeap<Reverse<(Phase, ActionId)>> = actions
        .iter()
        .filter(|a| indegree.get(&a.id) == Some(&0))
        .map(|a| Reverse((a.phase, a.id)))
        .collect();

    let mut order = Vec::with_capacity(actions.len());
    while let Some(Reverse((_, id))) = heap.pop() {
        order.push(id);
        for dependent in dependents.get(&id).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    heap.push(Reverse((known[dependent], *dependent)));
                }
            }
        }
    }

    (order.len() == actions.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_core::{ActionKind, IdempotencyKeyer};
    use serde_json::json;

    fn action(id: u32, kind: ActionKind, deps: &[u32]) -> Action {
        let source_id = format!("s{id}");
        Action {
            id: ActionId(id),
            kind,
            idempotency_key: IdempotencyKeyer::new().key(kind, &source_id, &json!({})),
            source_id,
            phase: kind.phase(),
            parameters: json!({}),
            requires: Vec::new(),
            dependencies: deps.iter().map(|d| ActionId(*d)).collect(),
            requires_user_input: false,
            user_input_prompts: Vec::new(),
            status: porter_core::ActionStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn order_breaks_ties_by_phase_then_id() {
        let actions = vec![
            action(0, ActionKind::WebhookCreate, &[]),
            action(1, ActionKind::LabelCreate, &[]),
            action(2, ActionKind::RepositoryCreate, &[]),
            action(3, ActionKind::LabelCreate, &[]),
        ];
        let order = topological_order(&actions).unwrap();
        assert_eq!(order, vec![ActionId(2), ActionId(1), ActionId(3), ActionId(0)]);
    }

    #[test]
    fn order_respects_dependencies_over_phase() {
        let actions = vec![
            action(0, ActionKind::RepositoryCreate, &[1]),
            action(1, ActionKind::WebhookCreate, &[]),
        ];
        assert_eq!(
            topological_order(&actions).unwrap(),
            vec![ActionId(1), ActionId(0)]
        );
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let actions = vec![
            action(0, ActionKind::LabelCreate, &[2]),
            action(1, ActionKind::LabelCreate, &[0]),
            action(2, ActionKind::LabelCreate, &[1]),
            action(3, ActionKind::LabelCreate, &[]),
        ];
        let cycles = find_cycles(&actions);
        assert_eq!(
            cycles,
            vec![ValidationError::Cycle {
                path: vec![ActionId(0), ActionId(1), ActionId(2), ActionId(0)]
            }]
        );
        assert!(topological_order(&actions).is_none());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let actions = vec![action(0, ActionKind::LabelCreate, &[0])];
        assert_eq!(
            find_cycles(&actions),
            vec![ValidationError::Cycle {
                path: vec![ActionId(0), ActionId(0)]
            }]
        );
    }

    #[test]
    fn unknown_dependencies_and_duplicates() {
        let mut dup = action(1, ActionKind::LabelCreate, &[9]);
        dup.source_id = "s0".into();
        dup.idempotency_key = IdempotencyKeyer::new().key(ActionKind::LabelCreate, "s0", &json!({}));
        let actions = vec![action(0, ActionKind::LabelCreate, &[]), dup];

        let errors = check(&actions);
        assert!(errors.contains(&ValidationError::UnknownDependency {
            action: ActionId(1),
            dependency: ActionId(9),
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateKey { actions, .. } if actions.len() == 2)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateProducer { .. })));
    }
}
