//! Planning use-case services.
//!
//! # Responsibility
//! - Orchestrate resolver, store, graph and cache calls into the operations
//!   exposed by [`planner::Planner`].
//! - Map layer errors onto one caller-facing taxonomy with stable codes.
//!
//! # Invariants
//! - Every operation ends in full success or full rejection.
//! - Error messages carry ids, field names and cycle paths, never raw
//!   storage paths.

use crate::graph::validator::{format_cycle, CycleStep};
use crate::identity::ResolveError;
use crate::model::id::{IdError, ObjectId};
use crate::model::object::{ObjectKind, ObjectStatus, ValidationError};
use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod planner;
pub mod task_service;

pub type PlanResult<T> = Result<T, PlanError>;

/// Caller-facing planner errors.
#[derive(Debug)]
pub enum PlanError {
    /// Planner configuration was rejected at open time.
    InvalidConfig(String),
    /// Id does not match the prefix grammar.
    InvalidIdFormat(IdError),
    /// Well-formed id with no record.
    NotFound(ObjectId),
    /// Claim scope does not resolve.
    ScopeNotFound(ObjectId),
    /// Direct claim or completion target does not resolve to a task.
    TaskNotFound(ObjectId),
    /// One or more prerequisites do not resolve. Collected, not short-circuited.
    UnknownPrerequisite(Vec<String>),
    /// Proposed edges close a cycle. Path starts and ends at the same node.
    CircularDependency(Vec<CycleStep>),
    /// Mutually exclusive request parameters.
    ParameterConflict(&'static str),
    /// Scope resolves to an object that cannot contain tasks.
    InvalidScope { id: ObjectId, kind: ObjectKind },
    /// Direct claim target is not open or still blocked.
    TaskNotAvailable {
        id: ObjectId,
        status: ObjectStatus,
        blocked_by: Vec<ObjectId>,
    },
    /// No open, unblocked task matched the claim.
    NoEligibleTask,
    /// Another writer holds or changed the record. Retryable.
    ClaimConflict(ObjectId),
    /// Operation is not valid for the object's current status.
    InvalidState { id: ObjectId, status: ObjectStatus },
    /// Parent is missing, of the wrong kind, or not allowed.
    InvalidParent(String),
    /// Status is not a member of the kind's status set, or is reserved.
    InvalidStatus { kind: ObjectKind, status: ObjectStatus },
    /// Status change is not an allowed workflow step.
    InvalidStatusTransition {
        id: ObjectId,
        from: ObjectStatus,
        to: ObjectStatus,
    },
    /// Title is blank after trim.
    InvalidTitle,
    /// Explicit id is already taken.
    DuplicateId(ObjectId),
    /// Storage failure or unreadable record.
    Store(StoreError),
}

impl PlanError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidIdFormat(_) => "invalid_id_format",
            Self::NotFound(_) => "not_found",
            Self::ScopeNotFound(_) => "scope_not_found",
            Self::TaskNotFound(_) => "task_not_found",
            Self::UnknownPrerequisite(_) => "unknown_prerequisite",
            Self::CircularDependency(_) => "circular_dependency",
            Self::ParameterConflict(_) => "parameter_conflict",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::TaskNotAvailable { .. } => "task_not_available",
            Self::NoEligibleTask => "no_eligible_task",
            Self::ClaimConflict(_) => "claim_conflict",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidParent(_) => "invalid_parent",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::InvalidTitle => "invalid_title",
            Self::DuplicateId(_) => "duplicate_id",
            Self::Store(StoreError::Io { .. }) => "io",
            Self::Store(_) => "invalid_record",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ClaimConflict(_))
    }
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid planner config: {message}"),
            Self::InvalidIdFormat(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "object not found: {id}"),
            Self::ScopeNotFound(id) => write!(f, "scope not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::UnknownPrerequisite(ids) => {
                write!(f, "unknown prerequisites: {}", ids.join(", "))
            }
            Self::CircularDependency(path) => {
                write!(f, "circular dependency: {}", format_cycle(path))
            }
            Self::ParameterConflict(message) => write!(f, "parameter conflict: {message}"),
            Self::InvalidScope { id, kind } => {
                write!(f, "scope `{id}` is a {kind}; expected project, epic or feature")
            }
            Self::TaskNotAvailable {
                id,
                status,
                blocked_by,
            } => {
                if blocked_by.is_empty() {
                    write!(f, "task `{id}` is not available: status is {status}")
                } else {
                    let blockers: Vec<&str> = blocked_by.iter().map(ObjectId::as_str).collect();
                    write!(
                        f,
                        "task `{id}` is not available: blocked by {}",
                        blockers.join(", ")
                    )
                }
            }
            Self::NoEligibleTask => write!(f, "no open, unblocked task is available"),
            Self::ClaimConflict(id) => {
                write!(f, "record `{id}` was changed by another caller; retry")
            }
            Self::InvalidState { id, status } => {
                write!(f, "operation not allowed for `{id}` in status {status}")
            }
            Self::InvalidParent(message) => write!(f, "invalid parent: {message}"),
            Self::InvalidStatus { kind, status } => {
                write!(f, "field `status`: `{status}` is not allowed for a {kind}")
            }
            Self::InvalidStatusTransition { id, from, to } => {
                write!(f, "field `status`: `{id}` cannot move from {from} to {to}")
            }
            Self::InvalidTitle => write!(f, "field `title` must not be blank"),
            Self::DuplicateId(id) => write!(f, "id already exists: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PlanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdFormat(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for PlanError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::AlreadyExists(id) => Self::DuplicateId(id),
            StoreError::ParentNotFound(id) => {
                Self::InvalidParent(format!("parent `{id}` does not exist"))
            }
            StoreError::Validation(err) => err.into(),
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for PlanError {
    fn from(value: ValidationError) -> Self {
        match value {
            ValidationError::EmptyTitle => Self::InvalidTitle,
            ValidationError::StatusNotAllowed { kind, status } => {
                Self::InvalidStatus { kind, status }
            }
            other => Self::InvalidParent(other.to_string()),
        }
    }
}

impl From<ResolveError> for PlanError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::InvalidIdFormat(err) => Self::InvalidIdFormat(err),
            ResolveError::NotFound(id) => Self::NotFound(id),
            ResolveError::Store(err) => err.into(),
        }
    }
}

impl From<IdError> for PlanError {
    fn from(value: IdError) -> Self {
        Self::InvalidIdFormat(value)
    }
}

#[cfg(test)]
mod tests {
    use super::PlanError;
    use crate::model::id::ObjectId;
    use crate::model::object::ValidationError;
    use crate::repo::StoreError;

    #[test]
    fn store_errors_map_onto_caller_taxonomy() {
        let id = ObjectId::parse("T-a").unwrap();
        assert_eq!(
            PlanError::from(StoreError::AlreadyExists(id.clone())).code(),
            "duplicate_id"
        );
        assert_eq!(
            PlanError::from(StoreError::Validation(ValidationError::EmptyTitle)).code(),
            "invalid_title"
        );
        let io = StoreError::Io {
            op: "read record",
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        };
        assert_eq!(PlanError::from(io).code(), "io");
        assert!(PlanError::ClaimConflict(id).is_retryable());
    }

    #[test]
    fn unknown_prerequisites_are_listed_in_one_message() {
        let err = PlanError::UnknownPrerequisite(vec!["T-x".to_string(), "bogus".to_string()]);
        assert_eq!(err.to_string(), "unknown prerequisites: T-x, bogus");
    }
}
