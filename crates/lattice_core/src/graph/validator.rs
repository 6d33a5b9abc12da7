//! Prerequisite existence and cycle checks.
//!
//! # Responsibility
//! - Batch every unresolvable prerequisite into one report.
//! - Detect cycles reachable from a mutated object with its proposed edges
//!   overlaid on the committed graph.
//!
//! # Invariants
//! - Checks are read-only; failures leave no trace in the store.
//! - DFS follows prerequisites in stored order.
//! - Reported cycles start at their smallest id, so the same cycle is
//!   reported identically whichever edge closed it.
//! - Memoized reach sets are only trusted for nodes that cannot reach the
//!   mutated object.

use crate::cache::ReachSet;
use crate::graph::Graph;
use crate::identity::Resolver;
use crate::model::id::ObjectId;
use crate::model::object::ObjectKind;
use crate::repo::record_store::RecordStore;
use crate::repo::StoreResult;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// One element of a reported cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleStep {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub standalone: bool,
}

impl CycleStep {
    pub fn for_id(id: &ObjectId) -> Self {
        Self {
            id: id.clone(),
            kind: id.kind(),
            standalone: id.is_standalone(),
        }
    }
}

impl Display for CycleStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let family = if self.standalone {
            "standalone"
        } else {
            "hierarchical"
        };
        write!(f, "{} ({}, {family})", self.id, self.kind)
    }
}

/// Renders a cycle as `A (..) → B (..) → A (..)`.
pub fn format_cycle(path: &[CycleStep]) -> String {
    path.iter()
        .map(CycleStep::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Result of one cycle search.
#[derive(Debug, Default)]
pub struct CycleSearch {
    /// Closed cycle path (first element repeated last), if one was found.
    pub cycle: Option<Vec<CycleStep>>,
    /// Nodes proven acyclic during the search, with their reach sets.
    pub learned: Vec<(ObjectId, ReachSet)>,
}

/// Collects prerequisite ids that do not resolve.
///
/// Malformed ids are reported verbatim. `object_id` itself counts as
/// existing so self-references reach cycle detection.
pub fn find_missing<S: RecordStore>(
    resolver: &Resolver<'_, S>,
    object_id: &ObjectId,
    prerequisites: &[String],
) -> StoreResult<Vec<String>> {
    let mut missing = Vec::new();
    for raw in prerequisites {
        let exists = match ObjectId::parse(raw) {
            Ok(id) if &id == object_id => true,
            Ok(id) => resolver.exists(&id)?,
            Err(_) => false,
        };
        let shown = raw.trim().to_string();
        if !exists && !missing.contains(&shown) {
            missing.push(shown);
        }
    }
    Ok(missing)
}

/// Depth-first search from `object_id`, whose outgoing edges are replaced
/// by `proposed`.
pub fn find_cycle(
    graph: &Graph,
    object_id: &ObjectId,
    proposed: &[ObjectId],
    memo: impl Fn(&ObjectId) -> Option<ReachSet>,
) -> CycleSearch {
    let successors = |id: &ObjectId| -> &[ObjectId] {
        if id == object_id {
            proposed
        } else {
            graph.prerequisites(id)
        }
    };

    let mut stack: Vec<(ObjectId, usize)> = vec![(object_id.clone(), 0)];
    let mut on_stack: HashMap<ObjectId, usize> = HashMap::from([(object_id.clone(), 0)]);
    let mut finished: HashMap<ObjectId, ReachSet> = HashMap::new();
    let mut learned = Vec::new();

    while let Some((current, next)) = stack.last().cloned() {
        let edges = successors(&current);
        if let Some(child) = edges.get(next) {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if let Some(&position) = on_stack.get(child) {
                let mut path: Vec<ObjectId> =
                    stack[position..].iter().map(|(id, _)| id.clone()).collect();
                path.push(child.clone());
                return CycleSearch {
                    cycle: Some(canonical_cycle(path)),
                    learned,
                };
            }
            if finished.contains_key(child) {
                continue;
            }
            if child != object_id {
                if let Some(reach) = memo(child).filter(|reach| !reach.contains(object_id)) {
                    finished.insert(child.clone(), reach);
                    continue;
                }
            }
            on_stack.insert(child.clone(), stack.len());
            stack.push((child.clone(), 0));
            continue;
        }

        stack.pop();
        on_stack.remove(&current);
        let mut reach = BTreeSet::new();
        for successor in edges {
            reach.insert(successor.clone());
            if let Some(below) = finished.get(successor) {
                reach.extend(below.iter().cloned());
            }
        }
        let reach: ReachSet = Arc::new(reach);
        if &current != object_id && !reach.contains(object_id) {
            learned.push((current.clone(), Arc::clone(&reach)));
        }
        finished.insert(current, reach);
    }

    CycleSearch {
        cycle: None,
        learned,
    }
}

/// Rotates a closed path so it starts at its smallest id.
fn canonical_cycle(path: Vec<ObjectId>) -> Vec<CycleStep> {
    let mut ring: Vec<ObjectId> = path[..path.len().saturating_sub(1)].to_vec();
    if let Some(start) = ring
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(index, _)| index)
    {
        ring.rotate_left(start);
    }
    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }
    ring.iter().map(CycleStep::for_id).collect()
}

#[cfg(test)]
mod tests {
    use super::{find_cycle, format_cycle};
    use crate::graph::Graph;
    use crate::model::id::ObjectId;
    use crate::model::object::WorkObject;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn id(raw: &str) -> ObjectId {
        ObjectId::parse(raw).unwrap()
    }

    fn with_prereqs(raw: &str, parent: Option<&str>, prereqs: &[&str]) -> WorkObject {
        let mut object = WorkObject::new(id(raw), parent.map(id), raw);
        object.prerequisites = prereqs.iter().map(|p| id(p)).collect();
        object
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let graph = Graph::default();
        let search = find_cycle(&graph, &id("ST-a"), &[id("ST-a")], |_| None);
        let cycle = search.cycle.unwrap();
        assert_eq!(
            format_cycle(&cycle),
            "ST-a (task, standalone) → ST-a (task, standalone)"
        );
    }

    #[test]
    fn cross_family_cycle_is_typed_and_rotated() {
        let mut graph = Graph::default();
        graph.insert(&with_prereqs("F-b", Some("E-e"), &["ST-a"]));
        let search = find_cycle(&graph, &id("ST-a"), &[id("F-b")], |_| None);
        assert_eq!(
            format_cycle(&search.cycle.unwrap()),
            "F-b (feature, hierarchical) → ST-a (task, standalone) → F-b (feature, hierarchical)"
        );
    }

    #[test]
    fn acyclic_search_learns_reach_sets_that_avoid_the_root() {
        let mut graph = Graph::default();
        graph.insert(&with_prereqs("ST-b", None, &["ST-c"]));
        graph.insert(&with_prereqs("ST-c", None, &[]));
        let search = find_cycle(&graph, &id("ST-a"), &[id("ST-b")], |_| None);
        assert!(search.cycle.is_none());

        let learned: Vec<_> = search.learned.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(learned, vec![id("ST-c"), id("ST-b")]);
        let reach_b = &search.learned[1].1;
        assert!(reach_b.contains(&id("ST-c")));
    }

    #[test]
    fn memo_is_ignored_when_it_reaches_the_mutated_object() {
        let mut graph = Graph::default();
        graph.insert(&with_prereqs("ST-b", None, &["ST-a"]));
        let stale = Arc::new(BTreeSet::from([id("ST-a")]));
        let search = find_cycle(&graph, &id("ST-a"), &[id("ST-b")], |candidate| {
            (candidate == &id("ST-b")).then(|| Arc::clone(&stale))
        });
        assert!(search.cycle.is_some());
    }
}
