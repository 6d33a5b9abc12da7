//! Identity resolution: opaque id string to kind and record location.
//!
//! # Responsibility
//! - Dispatch on the id prefix once, producing a closed [`ResolvedKind`].
//! - Confirm the record exists where the prefix says it should.
//!
//! # Invariants
//! - Resolution has no side effects besides filling the location cache.
//! - A cached location that vanished from disk is re-resolved, never served.

use crate::cache::PlanCache;
use crate::model::id::{IdError, ObjectId};
use crate::model::object::ObjectKind;
use crate::repo::layout::RecordLocation;
use crate::repo::record_store::RecordStore;
use crate::repo::StoreError;
use log::trace;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Resolved object kind. Tasks carry their parent feature, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedKind {
    Project,
    Epic,
    Feature,
    Task { parent: Option<ObjectId> },
}

impl ResolvedKind {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Project => ObjectKind::Project,
            Self::Epic => ObjectKind::Epic,
            Self::Feature => ObjectKind::Feature,
            Self::Task { .. } => ObjectKind::Task,
        }
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self, Self::Task { parent: None })
    }
}

/// One resolved id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: ObjectId,
    pub kind: ResolvedKind,
    pub location: RecordLocation,
}

#[derive(Debug)]
pub enum ResolveError {
    InvalidIdFormat(IdError),
    NotFound(ObjectId),
    Store(StoreError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdFormat(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "object not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdFormat(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for ResolveError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Resolver over one store and its location cache.
pub struct Resolver<'a, S: RecordStore> {
    store: &'a S,
    cache: &'a PlanCache,
}

impl<'a, S: RecordStore> Resolver<'a, S> {
    pub fn new(store: &'a S, cache: &'a PlanCache) -> Self {
        Self { store, cache }
    }

    /// Parses and resolves a raw id string.
    pub fn resolve_str(&self, raw: &str) -> Result<Resolved, ResolveError> {
        let id = ObjectId::parse(raw).map_err(ResolveError::InvalidIdFormat)?;
        self.resolve(&id)
    }

    pub fn resolve(&self, id: &ObjectId) -> Result<Resolved, ResolveError> {
        let location = match self.cache.location(id) {
            Some(location) if location.path.is_file() => {
                trace!("event=resolve module=identity status=cache_hit id={id}");
                location
            }
            _ => {
                self.cache.forget_location(id);
                let location = self
                    .store
                    .locate(id)?
                    .ok_or_else(|| ResolveError::NotFound(id.clone()))?;
                self.cache.remember_location(id, location.clone());
                location
            }
        };

        let kind = match id.kind() {
            ObjectKind::Project => ResolvedKind::Project,
            ObjectKind::Epic => ResolvedKind::Epic,
            ObjectKind::Feature => ResolvedKind::Feature,
            ObjectKind::Task => ResolvedKind::Task {
                parent: task_parent(id, &location),
            },
        };
        Ok(Resolved {
            id: id.clone(),
            kind,
            location,
        })
    }

    /// Returns whether `id` names an existing record.
    pub fn exists(&self, id: &ObjectId) -> Result<bool, StoreError> {
        match self.resolve(id) {
            Ok(_) => Ok(true),
            Err(ResolveError::NotFound(_)) | Err(ResolveError::InvalidIdFormat(_)) => Ok(false),
            Err(ResolveError::Store(err)) => Err(err),
        }
    }
}

/// Derives a hierarchical task's parent feature from its location.
fn task_parent(id: &ObjectId, location: &RecordLocation) -> Option<ObjectId> {
    if id.is_standalone() {
        return None;
    }
    location
        .home_dir()
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| ObjectId::parse(name).ok())
}
