//! Planner facade: object CRUD, dependency validation and read views.
//!
//! # Responsibility
//! - Validate create/update requests above the record store.
//! - Keep prerequisite edges resolvable and acyclic.
//! - Serve children, backlog and review views off the cached graph.
//!
//! # Invariants
//! - Every write runs under the record's lock and invalidates the cache
//!   before returning.
//! - Writes that add prerequisite edges hold the planner's edge lock from
//!   the cycle check until the cache is invalidated, so no two of them
//!   decide against the same committed graph.
//! - Validation happens before any byte is written; a rejected request
//!   leaves the store untouched.
//! - `open -> in-progress` on a task is reserved for claims and `-> done` for
//!   `complete_task`, with or without `force`.

use crate::cache::{self, PlanCache};
use crate::children::{self, ChildSummary};
use crate::config::PlannerConfig;
use crate::graph::validator::{find_cycle, find_missing};
use crate::graph::{builder, Graph, GraphNode};
use crate::identity::{ResolveError, Resolved, ResolvedKind, Resolver};
use crate::model::id::{IdPrefix, ObjectId};
use crate::model::object::{
    dedupe_ids, validate_parent, ObjectKind, ObjectStatus, Priority, WorkObject,
};
use crate::repo::claim_lock::RecordLock;
use crate::repo::record_store::{FsRecordStore, RecordStore};
use crate::service::{PlanError, PlanResult};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

/// Create request for one work object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    pub kind: ObjectKind,
    pub title: String,
    /// Explicit id; generated from the title when absent.
    pub id: Option<String>,
    pub parent: Option<String>,
    pub priority: Priority,
    /// Defaults to the kind's initial status.
    pub status: Option<ObjectStatus>,
    pub prerequisites: Vec<String>,
    pub body: String,
}

impl NewObject {
    pub fn new(kind: ObjectKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            id: None,
            parent: None,
            priority: Priority::default(),
            status: None,
            prerequisites: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_prerequisites<I, T>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPatch {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<ObjectStatus>,
    /// Replaces the whole prerequisite list when present.
    pub prerequisites: Option<Vec<String>>,
    pub body: Option<String>,
}

/// Backlog filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklogQuery {
    /// Restricts to hierarchical descendants of a project, epic or feature.
    pub scope: Option<String>,
    pub status: Option<ObjectStatus>,
    pub priority: Option<Priority>,
}

/// One backlog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogItem {
    pub id: ObjectId,
    pub title: String,
    pub status: ObjectStatus,
    pub priority: Priority,
    pub parent: Option<ObjectId>,
    pub standalone: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Prerequisites that are not done yet.
    pub blocked_by: Vec<ObjectId>,
}

impl BacklogItem {
    fn from_node(node: &GraphNode, graph: &Graph) -> Self {
        Self {
            id: node.id.clone(),
            title: node.title.clone(),
            status: node.status,
            priority: node.priority,
            parent: node.parent.clone(),
            standalone: node.is_standalone(),
            created: node.created,
            updated: node.updated,
            blocked_by: graph.blockers(&node.id),
        }
    }
}

/// Planning service over one record store.
pub struct Planner<S: RecordStore = FsRecordStore> {
    pub(super) store: S,
    pub(super) cache: PlanCache,
    edges: Mutex<()>,
}

impl Planner<FsRecordStore> {
    /// Opens a filesystem-backed planner rooted at `config.root`.
    pub fn open(config: PlannerConfig) -> PlanResult<Self> {
        config.validate().map_err(PlanError::InvalidConfig)?;
        info!(
            "event=planner_open module=planner status=ok sync_writes={}",
            config.sync_writes
        );
        Ok(Self::with_store(FsRecordStore::new(&config)))
    }
}

impl<S: RecordStore> Planner<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            cache: PlanCache::new(),
            edges: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drops every cached view. Needed after records are edited out of band.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub(super) fn resolver(&self) -> Resolver<'_, S> {
        Resolver::new(&self.store, &self.cache)
    }

    /// Resolves an id to its kind variant.
    pub fn resolve_kind(&self, id: &str) -> PlanResult<ResolvedKind> {
        Ok(self.resolver().resolve_str(id)?.kind)
    }

    pub fn get_object(&self, id: &str) -> PlanResult<WorkObject> {
        let resolved = self.resolver().resolve_str(id)?;
        Ok(self.store.load_at(&resolved.location)?)
    }

    /// Full dependency graph, cached until the next write.
    pub fn graph(&self) -> PlanResult<Arc<Graph>> {
        if let Some(graph) = self.cache.graph() {
            return Ok(graph);
        }
        let generation = self.cache.generation();
        let graph = Arc::new(builder::build(&self.store, &self.resolver(), None)?);
        self.cache.store_graph(generation, Arc::clone(&graph));
        Ok(graph)
    }

    /// Creates one object after validating parent, status, title and edges.
    pub fn create_object(&self, request: NewObject) -> PlanResult<WorkObject> {
        let kind = request.kind;
        let title = normalize_title(&request.title)?;
        let parent = request
            .parent
            .as_deref()
            .map(ObjectId::parse)
            .transpose()?;
        let explicit_id = request.id.is_some();
        let id = match request.id.as_deref() {
            Some(raw) => ObjectId::parse(raw)?,
            None => {
                let standalone = kind == ObjectKind::Task && parent.is_none();
                ObjectId::generate(IdPrefix::for_kind(kind, standalone), &title)
            }
        };
        if id.kind() != kind {
            return Err(PlanError::InvalidParent(format!(
                "id `{id}` does not identify a {kind}"
            )));
        }
        validate_parent(&id, kind, parent.as_ref())?;

        let status = request.status.unwrap_or_else(|| kind.default_status());
        if !kind.allows_status(status) || is_reserved_task_status(kind, status) {
            return Err(PlanError::InvalidStatus { kind, status });
        }
        if let Some(parent) = &parent {
            self.ensure_parent_exists(parent)?;
        }

        let (id, _lock) = if explicit_id {
            let lock = self.lock_record(&id)?;
            if self.resolver().exists(&id)? {
                return Err(PlanError::DuplicateId(id));
            }
            (id, lock)
        } else {
            self.reserve_generated_id(&id)?
        };
        let _edges = (!request.prerequisites.is_empty()).then(|| self.lock_edges());
        let prerequisites = self.check_prerequisites(&id, &request.prerequisites)?;

        let mut object = WorkObject::new(id, parent, title);
        object.status = status;
        object.priority = request.priority;
        object.prerequisites = prerequisites;
        object.body = request.body;
        self.store.create(&object)?;
        self.cache
            .invalidate_write(&object.id, !object.prerequisites.is_empty());

        info!(
            "event=object_create module=planner status=ok id={} kind={} prerequisites={}",
            object.id,
            object.kind,
            object.prerequisites.len()
        );
        Ok(object)
    }

    /// Applies a patch. `force` skips workflow transition checks, except
    /// that tasks still only reach `done` through `complete_task`.
    pub fn update_object(&self, id: &str, patch: ObjectPatch, force: bool) -> PlanResult<WorkObject> {
        let resolved = self.resolver().resolve_str(id)?;
        let _lock = self.lock_record(&resolved.id)?;
        let mut object = self.store.load(&resolved.id)?;
        let before = object.status;

        if let Some(title) = patch.title {
            object.title = normalize_title(&title)?;
        }
        if let Some(priority) = patch.priority {
            object.priority = priority;
        }
        if let Some(body) = patch.body {
            object.body = body;
        }
        if let Some(status) = patch.status {
            check_transition(&object, status, force)?;
            object.status = status;
        }
        let mut edges_changed = false;
        let _edges = patch.prerequisites.is_some().then(|| self.lock_edges());
        if let Some(raw) = patch.prerequisites {
            let prerequisites = self.check_prerequisites(&object.id, &raw)?;
            edges_changed = prerequisites != object.prerequisites;
            object.prerequisites = prerequisites;
        }

        object.touch();
        self.store.save(&object)?;
        self.cache.invalidate_write(&object.id, edges_changed);
        info!(
            "event=object_update module=planner status=ok id={} from={} to={} force={}",
            object.id, before, object.status, force
        );
        Ok(object)
    }

    /// Checks that `prerequisite_ids` all resolve and add no cycle through
    /// `object_id`. The object itself need not exist yet.
    pub fn validate_prerequisites(
        &self,
        object_id: &str,
        prerequisite_ids: &[String],
    ) -> PlanResult<()> {
        let object_id = ObjectId::parse(object_id)?;
        let _edges = self.lock_edges();
        self.check_prerequisites(&object_id, prerequisite_ids)
            .map(|_| ())
    }

    /// Immediate children sorted by creation time, then id.
    pub fn list_children(&self, id: &str) -> PlanResult<Vec<ChildSummary>> {
        let resolved = self.resolver().resolve_str(id)?;
        let children = children::list_children(&self.store, &self.cache, &resolved)?;
        Ok(children.as_ref().clone())
    }

    /// Tasks matching `query` in claim order.
    pub fn list_backlog(&self, query: BacklogQuery) -> PlanResult<Vec<BacklogItem>> {
        let scope = query
            .scope
            .as_deref()
            .map(|raw| self.resolve_scope(raw))
            .transpose()?;
        let graph = self.graph()?;

        let mut nodes: Vec<&GraphNode> = graph
            .nodes()
            .filter(|node| node.kind == ObjectKind::Task)
            .filter(|node| match &scope {
                Some(scope) => !node.is_standalone() && graph.is_descendant_of(&node.id, &scope.id),
                None => true,
            })
            .filter(|node| query.status.map_or(true, |status| node.status == status))
            .filter(|node| query.priority.map_or(true, |priority| node.priority == priority))
            .collect();
        nodes.sort_by(|a, b| queue_order(a, b));

        debug!(
            "event=backlog_list module=planner status=ok scope={} count={}",
            scope.as_ref().map(|s| s.id.as_str()).unwrap_or("all"),
            nodes.len()
        );
        Ok(nodes
            .into_iter()
            .map(|node| BacklogItem::from_node(node, &graph))
            .collect())
    }

    /// The task waiting longest in `review`, if any.
    pub fn next_reviewable_task(&self) -> PlanResult<Option<WorkObject>> {
        let graph = self.graph()?;
        let oldest = graph
            .nodes()
            .filter(|node| node.kind == ObjectKind::Task && node.status == ObjectStatus::Review)
            .min_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));
        match oldest {
            Some(node) => Ok(Some(self.store.load(&node.id)?)),
            None => Ok(None),
        }
    }

    /// Resolves a claim or backlog scope; only containers qualify.
    pub(super) fn resolve_scope(&self, raw: &str) -> PlanResult<Resolved> {
        let resolved = match self.resolver().resolve_str(raw) {
            Ok(resolved) => resolved,
            Err(ResolveError::NotFound(id)) => return Err(PlanError::ScopeNotFound(id)),
            Err(err) => return Err(err.into()),
        };
        if let ResolvedKind::Task { .. } = resolved.kind {
            return Err(PlanError::InvalidScope {
                id: resolved.id,
                kind: ObjectKind::Task,
            });
        }
        Ok(resolved)
    }

    pub(super) fn lock_record(&self, id: &ObjectId) -> PlanResult<RecordLock> {
        self.store.try_lock(id)?.ok_or_else(|| {
            warn!("event=record_lock module=planner status=conflict id={id}");
            PlanError::ClaimConflict(id.clone())
        })
    }

    /// Serializes prerequisite edge changes across callers of this planner.
    fn lock_edges(&self) -> MutexGuard<'_, ()> {
        cache::lock(&self.edges)
    }

    /// Callers must hold the edge lock until the resulting write has
    /// invalidated the cache.
    fn check_prerequisites(
        &self,
        object_id: &ObjectId,
        raw: &[String],
    ) -> PlanResult<Vec<ObjectId>> {
        let missing = find_missing(&self.resolver(), object_id, raw)?;
        if !missing.is_empty() {
            warn!(
                "event=prerequisite_check module=planner status=unknown id={} count={}",
                object_id,
                missing.len()
            );
            return Err(PlanError::UnknownPrerequisite(missing));
        }
        let proposed = dedupe_ids(raw.iter().filter_map(|value| ObjectId::parse(value).ok()));
        if proposed.is_empty() {
            return Ok(proposed);
        }

        let epoch = self.cache.acyclic_epoch();
        let graph = self.graph()?;
        let search = find_cycle(&graph, object_id, &proposed, |id| self.cache.acyclic(id));
        self.cache.store_acyclic(epoch, search.learned);
        if let Some(path) = search.cycle {
            warn!(
                "event=prerequisite_check module=planner status=cycle id={} length={}",
                object_id,
                path.len().saturating_sub(1)
            );
            return Err(PlanError::CircularDependency(path));
        }
        Ok(proposed)
    }

    fn ensure_parent_exists(&self, parent: &ObjectId) -> PlanResult<()> {
        match self.resolver().resolve(parent) {
            Ok(_) => Ok(()),
            Err(ResolveError::NotFound(_)) => Err(PlanError::InvalidParent(format!(
                "parent `{parent}` does not exist"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Picks the first free `base`, `base-2`, `base-3`, ... and locks it.
    /// Ids locked by a concurrent create are skipped rather than reported.
    fn reserve_generated_id(&self, base: &ObjectId) -> PlanResult<(ObjectId, RecordLock)> {
        let resolver = self.resolver();
        let mut suffix = 1;
        loop {
            let candidate = if suffix == 1 {
                base.clone()
            } else {
                base.with_suffix(suffix)
            };
            suffix += 1;
            if resolver.exists(&candidate)? {
                continue;
            }
            let Some(lock) = self.store.try_lock(&candidate)? else {
                debug!("event=id_reserve module=planner status=busy id={candidate}");
                continue;
            };
            if !resolver.exists(&candidate)? {
                return Ok((candidate, lock));
            }
        }
    }
}

/// Claim queue order: priority rank, then age, then id.
pub(crate) fn queue_order(a: &GraphNode, b: &GraphNode) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| a.created.cmp(&b.created))
        .then_with(|| a.id.cmp(&b.id))
}

fn normalize_title(raw: &str) -> PlanResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PlanError::InvalidTitle);
    }
    Ok(trimmed.to_string())
}

fn is_reserved_task_status(kind: ObjectKind, status: ObjectStatus) -> bool {
    kind == ObjectKind::Task && matches!(status, ObjectStatus::InProgress | ObjectStatus::Done)
}

fn check_transition(object: &WorkObject, to: ObjectStatus, force: bool) -> PlanResult<()> {
    let from = object.status;
    if !object.kind.allows_status(to) {
        return Err(PlanError::InvalidStatus {
            kind: object.kind,
            status: to,
        });
    }
    if from == to {
        return Ok(());
    }
    let rejected = || PlanError::InvalidStatusTransition {
        id: object.id.clone(),
        from,
        to,
    };
    if object.kind == ObjectKind::Task && to == ObjectStatus::Done {
        return Err(rejected());
    }
    if force {
        return Ok(());
    }

    use ObjectStatus::{Draft, InProgress, Open, Review};
    let allowed = match object.kind {
        ObjectKind::Task => matches!(
            (from, to),
            (InProgress, Review) | (InProgress, Open) | (Review, InProgress)
        ),
        _ => matches!(
            (from, to),
            (Draft, InProgress) | (InProgress, ObjectStatus::Done)
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(rejected())
    }
}
