//! Dependency graph derived from records.
//!
//! # Responsibility
//! - Hold one node per object (hierarchical and standalone alike) and one
//!   edge per prerequisite entry.
//! - Answer blocking and ancestry questions for claims and backlog views.
//!
//! # Invariants
//! - Edge `u -> v` means "u requires v done".
//! - Edge lists keep stored order with duplicates collapsed; self-edges stay.
//! - The graph is a disposable view; records remain the source of truth.

pub mod builder;
pub mod validator;

use crate::model::id::ObjectId;
use crate::model::object::{dedupe_ids, ObjectKind, ObjectStatus, Priority, WorkObject};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Graph node snapshot of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub parent: Option<ObjectId>,
    pub status: ObjectStatus,
    pub priority: Priority,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl GraphNode {
    pub fn is_standalone(&self) -> bool {
        self.kind == ObjectKind::Task && self.parent.is_none()
    }
}

impl From<&WorkObject> for GraphNode {
    fn from(object: &WorkObject) -> Self {
        Self {
            id: object.id.clone(),
            kind: object.kind,
            parent: object.parent.clone(),
            status: object.status,
            priority: object.priority,
            title: object.title.clone(),
            created: object.created,
            updated: object.updated,
        }
    }
}

/// Node set plus prerequisite edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<ObjectId, GraphNode>,
    edges: BTreeMap<ObjectId, Vec<ObjectId>>,
}

impl Graph {
    /// Adds or replaces one object and its outgoing edges.
    pub fn insert(&mut self, object: &WorkObject) {
        self.nodes.insert(object.id.clone(), GraphNode::from(object));
        self.edges.insert(
            object.id.clone(),
            dedupe_ids(object.prerequisites.iter().cloned()),
        );
    }

    pub fn node(&self, id: &ObjectId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Prerequisites of `id` in stored order; empty for unknown ids.
    pub fn prerequisites(&self, id: &ObjectId) -> &[ObjectId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Prerequisites of `id` that are not done. Unknown prerequisites block.
    pub fn blockers(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.prerequisites(id)
            .iter()
            .filter(|prerequisite| {
                self.node(prerequisite)
                    .map(|node| node.status != ObjectStatus::Done)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn is_unblocked(&self, id: &ObjectId) -> bool {
        self.blockers(id).is_empty()
    }

    /// Whether `id` sits strictly below `ancestor` in the containment tree.
    pub fn is_descendant_of(&self, id: &ObjectId, ancestor: &ObjectId) -> bool {
        let mut cursor = self.node(id).and_then(|node| node.parent.clone());
        // Depth is bounded by the four-level hierarchy.
        for _ in 0..4 {
            match cursor {
                Some(current) if &current == ancestor => return true,
                Some(current) => cursor = self.node(&current).and_then(|node| node.parent.clone()),
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::Graph;
    use crate::model::id::ObjectId;
    use crate::model::object::{ObjectStatus, WorkObject};

    fn id(raw: &str) -> ObjectId {
        ObjectId::parse(raw).unwrap()
    }

    #[test]
    fn insert_collapses_duplicate_edges_and_keeps_self_edges() {
        let mut graph = Graph::default();
        let mut task = WorkObject::new(id("ST-a"), None, "A");
        task.prerequisites = vec![id("ST-b"), id("ST-a"), id("ST-b")];
        graph.insert(&task);

        assert_eq!(graph.prerequisites(&id("ST-a")), &[id("ST-b"), id("ST-a")]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn blockers_treat_missing_and_unfinished_prerequisites_as_blocking() {
        let mut graph = Graph::default();
        let mut task = WorkObject::new(id("ST-a"), None, "A");
        task.prerequisites = vec![id("ST-done"), id("ST-open"), id("ST-gone")];
        let mut done = WorkObject::new(id("ST-done"), None, "Done");
        done.status = ObjectStatus::Done;
        graph.insert(&task);
        graph.insert(&done);
        graph.insert(&WorkObject::new(id("ST-open"), None, "Open"));

        assert_eq!(graph.blockers(&id("ST-a")), vec![id("ST-open"), id("ST-gone")]);
        assert!(!graph.is_unblocked(&id("ST-a")));
        assert!(graph.is_unblocked(&id("ST-done")));
    }

    #[test]
    fn descendant_walk_follows_parent_chain() {
        let mut graph = Graph::default();
        graph.insert(&WorkObject::new(id("P-p"), None, "P"));
        graph.insert(&WorkObject::new(id("E-e"), Some(id("P-p")), "E"));
        graph.insert(&WorkObject::new(id("F-f"), Some(id("E-e")), "F"));
        graph.insert(&WorkObject::new(id("T-t"), Some(id("F-f")), "T"));
        graph.insert(&WorkObject::new(id("ST-s"), None, "S"));

        assert!(graph.is_descendant_of(&id("T-t"), &id("P-p")));
        assert!(graph.is_descendant_of(&id("T-t"), &id("F-f")));
        assert!(!graph.is_descendant_of(&id("P-p"), &id("P-p")));
        assert!(!graph.is_descendant_of(&id("ST-s"), &id("P-p")));
    }
}
