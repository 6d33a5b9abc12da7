//! Memoization tiers for resolver, children, graph and acyclicity results.
//!
//! # Invariants
//! - Every write through the planner bumps the generation and invalidates
//!   the tiers it can affect before the write call returns.
//! - Values computed against an older generation are never stored; a
//!   build that raced a write is simply recomputed next time.
//! - The acyclic tier has its own epoch, bumped only by edge changes. The
//!   epoch check and the insert happen under the same lock as the clear.

use crate::children::ChildSummary;
use crate::graph::Graph;
use crate::model::id::ObjectId;
use crate::repo::layout::RecordLocation;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Reach set of a node known to have no cycle below it.
pub type ReachSet = Arc<BTreeSet<ObjectId>>;

#[derive(Debug, Default)]
pub struct PlanCache {
    generation: AtomicU64,
    locations: Mutex<HashMap<ObjectId, RecordLocation>>,
    children: Mutex<HashMap<ObjectId, (u64, Arc<Vec<ChildSummary>>)>>,
    graph: Mutex<Option<(u64, Arc<Graph>)>>,
    acyclic: Mutex<AcyclicMemo>,
}

#[derive(Debug, Default)]
struct AcyclicMemo {
    epoch: u64,
    reach: HashMap<ObjectId, ReachSet>,
}

impl AcyclicMemo {
    fn reset(&mut self) {
        self.epoch += 1;
        self.reach.clear();
    }
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn location(&self, id: &ObjectId) -> Option<RecordLocation> {
        lock(&self.locations).get(id).cloned()
    }

    pub fn remember_location(&self, id: &ObjectId, location: RecordLocation) {
        lock(&self.locations).insert(id.clone(), location);
    }

    pub fn forget_location(&self, id: &ObjectId) {
        lock(&self.locations).remove(id);
    }

    pub fn children(&self, id: &ObjectId) -> Option<Arc<Vec<ChildSummary>>> {
        let generation = self.generation();
        lock(&self.children)
            .get(id)
            .filter(|(stored, _)| *stored == generation)
            .map(|(_, children)| Arc::clone(children))
    }

    pub fn store_children(&self, id: &ObjectId, generation: u64, children: Arc<Vec<ChildSummary>>) {
        if generation == self.generation() {
            lock(&self.children).insert(id.clone(), (generation, children));
        }
    }

    pub fn graph(&self) -> Option<Arc<Graph>> {
        let generation = self.generation();
        lock(&self.graph)
            .as_ref()
            .filter(|(stored, _)| *stored == generation)
            .map(|(_, graph)| Arc::clone(graph))
    }

    pub fn store_graph(&self, generation: u64, graph: Arc<Graph>) {
        if generation == self.generation() {
            *lock(&self.graph) = Some((generation, graph));
        }
    }

    /// Epoch to pass back to [`PlanCache::store_acyclic`].
    pub fn acyclic_epoch(&self) -> u64 {
        lock(&self.acyclic).epoch
    }

    pub fn acyclic(&self, id: &ObjectId) -> Option<ReachSet> {
        lock(&self.acyclic).reach.get(id).cloned()
    }

    /// Stores reach sets learned at `epoch`; dropped if edges changed since.
    pub fn store_acyclic(&self, epoch: u64, entries: Vec<(ObjectId, ReachSet)>) {
        let mut memo = lock(&self.acyclic);
        if memo.epoch != epoch {
            return;
        }
        memo.reach.extend(entries);
    }

    /// Invalidates after a write to `id`.
    ///
    /// Children and graph tiers are dropped wholesale; the acyclic tier only
    /// when prerequisite edges changed.
    pub fn invalidate_write(&self, id: &ObjectId, edges_changed: bool) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.forget_location(id);
        lock(&self.children).clear();
        *lock(&self.graph) = None;
        if edges_changed {
            lock(&self.acyclic).reset();
        }
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        lock(&self.locations).clear();
        lock(&self.children).clear();
        *lock(&self.graph) = None;
        lock(&self.acyclic).reset();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Cached values are plain data; a poisoned guard is still consistent.
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::PlanCache;
    use crate::graph::Graph;
    use crate::model::id::ObjectId;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn stale_generation_results_are_discarded() {
        let cache = PlanCache::new();
        let started = cache.generation();
        cache.invalidate_write(&ObjectId::parse("T-a").unwrap(), false);

        cache.store_graph(started, Arc::new(Graph::default()));
        assert!(cache.graph().is_none());

        cache.store_graph(cache.generation(), Arc::new(Graph::default()));
        assert!(cache.graph().is_some());
    }

    #[test]
    fn acyclic_tier_survives_writes_without_edge_changes() {
        let cache = PlanCache::new();
        let id = ObjectId::parse("T-a").unwrap();
        cache.store_acyclic(cache.acyclic_epoch(), vec![(id.clone(), Arc::new(BTreeSet::new()))]);

        cache.invalidate_write(&id, false);
        assert!(cache.acyclic(&id).is_some());

        cache.invalidate_write(&id, true);
        assert!(cache.acyclic(&id).is_none());
    }

    #[test]
    fn reach_sets_learned_before_an_edge_change_are_dropped() {
        let cache = PlanCache::new();
        let n = ObjectId::parse("ST-n").unwrap();
        let o = ObjectId::parse("ST-o").unwrap();
        let epoch = cache.acyclic_epoch();

        cache.invalidate_write(&n, true);
        cache.store_acyclic(epoch, vec![(n.clone(), Arc::new(BTreeSet::new()))]);
        assert!(cache.acyclic(&n).is_none());

        cache.store_acyclic(
            cache.acyclic_epoch(),
            vec![(n.clone(), Arc::new(BTreeSet::from([o.clone()])))],
        );
        assert!(cache.acyclic(&n).is_some_and(|reach| reach.contains(&o)));
    }

    #[test]
    fn status_only_writes_keep_the_memo_epoch() {
        let cache = PlanCache::new();
        let id = ObjectId::parse("T-a").unwrap();
        let epoch = cache.acyclic_epoch();
        cache.invalidate_write(&id, false);
        assert_eq!(cache.acyclic_epoch(), epoch);
        cache.clear();
        assert_ne!(cache.acyclic_epoch(), epoch);
    }
}
