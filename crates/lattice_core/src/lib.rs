//! Core planning engine for Lattice.
//! Work items live as text records under `planning/`; this crate owns their
//! identity, placement, dependency graph and claim workflow.

pub mod cache;
pub mod children;
pub mod config;
pub mod graph;
pub mod identity;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use children::ChildSummary;
pub use config::PlannerConfig;
pub use graph::validator::{format_cycle, CycleStep};
pub use graph::{Graph, GraphNode};
pub use identity::{Resolved, ResolvedKind};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::id::{IdError, IdPrefix, ObjectId};
pub use model::object::{ObjectKind, ObjectStatus, Priority, ValidationError, WorkObject};
pub use repo::record_store::{FsRecordStore, RecordStore, StoredRecord};
pub use repo::{StoreError, StoreResult};
pub use service::planner::{BacklogItem, BacklogQuery, NewObject, ObjectPatch, Planner};
pub use service::task_service::{ClaimRequest, ClaimTicket, ClaimedTask};
pub use service::{PlanError, PlanResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
