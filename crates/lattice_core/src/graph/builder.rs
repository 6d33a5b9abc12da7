//! Lazy graph assembly from the record store.
//!
//! # Invariants
//! - The standalone pool is always part of the graph; prerequisite edges
//!   cross freely between the two id families.
//! - Objects referenced by an in-scope prerequisite are pulled in even when
//!   they live outside the scope.
//! - Build cost is O(objects + edges); no locks are taken.

use crate::graph::Graph;
use crate::identity::{Resolved, ResolveError, Resolver};
use crate::repo::record_store::RecordStore;
use crate::repo::StoreResult;
use log::debug;
use std::time::Instant;

/// Builds the graph for `scope`, or for the whole store when `None`.
pub fn build<S: RecordStore>(
    store: &S,
    resolver: &Resolver<'_, S>,
    scope: Option<&Resolved>,
) -> StoreResult<Graph> {
    let started_at = Instant::now();
    let mut graph = Graph::default();

    for record in store.list_records(scope.map(|resolved| &resolved.location))? {
        graph.insert(&record.object);
    }
    if scope.is_some() {
        for record in store.list_standalone()? {
            graph.insert(&record.object);
        }
    }

    let referenced: Vec<_> = graph
        .nodes()
        .flat_map(|node| graph.prerequisites(&node.id).iter())
        .filter(|id| !graph.contains(id))
        .cloned()
        .collect();
    for id in referenced {
        if graph.contains(&id) {
            continue;
        }
        match resolver.resolve(&id) {
            Ok(resolved) => {
                let object = store.load_at(&resolved.location)?;
                graph.insert(&object);
            }
            Err(ResolveError::Store(err)) => return Err(err),
            Err(ResolveError::NotFound(_)) | Err(ResolveError::InvalidIdFormat(_)) => {
                debug!("event=graph_build module=graph status=dangling_edge id={id}");
            }
        }
    }

    debug!(
        "event=graph_build module=graph status=ok scope={} nodes={} edges={} duration_ms={}",
        scope.map(|resolved| resolved.id.as_str()).unwrap_or("all"),
        graph.node_count(),
        graph.edge_count(),
        started_at.elapsed().as_millis()
    );
    Ok(graph)
}
