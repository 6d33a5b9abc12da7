//! Immediate-children index.
//!
//! # Responsibility
//! - List the direct children of one container object.
//!
//! # Invariants
//! - Project lists epics, epic lists features, feature lists tasks from both
//!   status directories. Tasks have no children and standalone tasks are
//!   never children.
//! - Output is sorted by `created`, ties broken by id, so repeated calls
//!   without writes return identical output.

use crate::cache::PlanCache;
use crate::identity::Resolved;
use crate::model::id::ObjectId;
use crate::model::object::{ObjectKind, ObjectStatus, WorkObject};
use crate::repo::record_store::RecordStore;
use crate::repo::StoreResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Summary row returned by the children index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildSummary {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub title: String,
    pub status: ObjectStatus,
    pub created: DateTime<Utc>,
}

impl From<&WorkObject> for ChildSummary {
    fn from(object: &WorkObject) -> Self {
        Self {
            id: object.id.clone(),
            kind: object.kind,
            title: object.title.clone(),
            status: object.status,
            created: object.created,
        }
    }
}

/// Lists the immediate children of `parent`, consulting the cache first.
pub fn list_children<S: RecordStore>(
    store: &S,
    cache: &PlanCache,
    parent: &Resolved,
) -> StoreResult<Arc<Vec<ChildSummary>>> {
    if let Some(children) = cache.children(&parent.id) {
        return Ok(children);
    }
    let generation = cache.generation();
    let kind = parent.kind.kind();
    if kind == ObjectKind::Task {
        return Ok(Arc::new(Vec::new()));
    }

    let mut children: Vec<ChildSummary> = store
        .list_child_records(&parent.location, kind)?
        .iter()
        .map(|record| ChildSummary::from(&record.object))
        .collect();
    children.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

    let children = Arc::new(children);
    cache.store_children(&parent.id, generation, Arc::clone(&children));
    Ok(children)
}
