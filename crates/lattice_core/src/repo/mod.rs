//! Record persistence layer.
//!
//! # Responsibility
//! - Own the on-disk layout and the text record format.
//! - Provide atomic load/save/move primitives over individual records.
//!
//! # Invariants
//! - Saves are all-or-nothing: temp file, fsync, rename.
//! - Moves write the new copy durably before deleting the old one.
//! - Error messages never contain raw storage paths.

use crate::model::id::ObjectId;
use crate::model::object::ValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod claim_lock;
pub mod codec;
pub mod layout;
pub mod record_store;

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store failures.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem operation failed. `op` names the step, never the path.
    Io {
        op: &'static str,
        source: std::io::Error,
    },
    /// Persisted record cannot be decoded into a valid object.
    InvalidRecord { record: String, message: String },
    /// No record exists for the id.
    NotFound(ObjectId),
    /// A record with the id already exists.
    AlreadyExists(ObjectId),
    /// Parent record required for placement does not exist.
    ParentNotFound(ObjectId),
    /// Object failed model validation before write.
    Validation(ValidationError),
}

impl StoreError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> StoreError {
        move |source| StoreError::Io { op, source }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { op, source } => write!(f, "storage {op} failed: {source}"),
            Self::InvalidRecord { record, message } => {
                write!(f, "invalid record `{record}`: {message}")
            }
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "record already exists: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent record not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            Self::InvalidRecord { .. } => None,
            Self::NotFound(_) => None,
            Self::AlreadyExists(_) => None,
            Self::ParentNotFound(_) => None,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}
