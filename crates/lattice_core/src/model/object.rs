//! Work object domain model.
//!
//! # Responsibility
//! - Define the canonical record shared by projects, epics, features and
//!   tasks.
//! - Own per-kind status sets and parent rules.
//!
//! # Invariants
//! - Project has no parent; epic requires a project, feature requires an
//!   epic; a task has a feature parent or none (standalone).
//! - `status` is always a member of the kind's status set.
//! - `updated` never moves backwards on [`WorkObject::touch`].

use crate::model::id::ObjectId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Record schema version written into every front-matter block.
pub const SCHEMA_VERSION: &str = "1.1";

/// Work item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Project,
    Epic,
    Feature,
    Task,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Epic => "epic",
            Self::Feature => "feature",
            Self::Task => "task",
        }
    }

    /// Kind required for the parent, if any.
    ///
    /// Tasks report `Feature` even though the parent is optional for them.
    pub fn parent_kind(self) -> Option<ObjectKind> {
        match self {
            Self::Project => None,
            Self::Epic => Some(Self::Project),
            Self::Feature => Some(Self::Epic),
            Self::Task => Some(Self::Feature),
        }
    }

    pub fn child_kind(self) -> Option<ObjectKind> {
        match self {
            Self::Project => Some(Self::Epic),
            Self::Epic => Some(Self::Feature),
            Self::Feature => Some(Self::Task),
            Self::Task => None,
        }
    }

    pub fn default_status(self) -> ObjectStatus {
        match self {
            Self::Task => ObjectStatus::Open,
            _ => ObjectStatus::Draft,
        }
    }

    /// Statuses valid for this kind in workflow order.
    pub fn statuses(self) -> &'static [ObjectStatus] {
        match self {
            Self::Task => &[
                ObjectStatus::Open,
                ObjectStatus::InProgress,
                ObjectStatus::Review,
                ObjectStatus::Done,
            ],
            _ => &[
                ObjectStatus::Draft,
                ObjectStatus::InProgress,
                ObjectStatus::Done,
            ],
        }
    }

    pub fn allows_status(self, status: ObjectStatus) -> bool {
        self.statuses().contains(&status)
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow status. Valid members depend on [`ObjectKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStatus {
    Draft,
    Open,
    InProgress,
    Review,
    Done,
}

impl ObjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Open),
            "in-progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl Display for ObjectStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank; lower ranks are claimed first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Title is blank after trim.
    EmptyTitle,
    /// Id prefix disagrees with kind or parentedness.
    IdKindMismatch { id: ObjectId, kind: ObjectKind },
    /// Kind requires a parent but none was given.
    MissingParent(ObjectKind),
    /// Project was given a parent.
    UnexpectedParent(ObjectKind),
    /// Parent id has the wrong kind.
    InvalidParentKind {
        parent: ObjectId,
        expected: ObjectKind,
    },
    /// Status is not a member of the kind's status set.
    StatusNotAllowed {
        kind: ObjectKind,
        status: ObjectStatus,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "field `title` must not be blank"),
            Self::IdKindMismatch { id, kind } => {
                write!(f, "id `{id}` does not identify a {kind} with this parent")
            }
            Self::MissingParent(kind) => write!(f, "field `parent` is required for a {kind}"),
            Self::UnexpectedParent(kind) => write!(f, "a {kind} cannot have a parent"),
            Self::InvalidParentKind { parent, expected } => {
                write!(f, "field `parent` must reference a {expected}, got `{parent}`")
            }
            Self::StatusNotAllowed { kind, status } => {
                write!(f, "status `{status}` is not valid for a {kind}")
            }
        }
    }
}

impl Error for ValidationError {}

/// Canonical persisted work object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    /// `None` for projects and standalone tasks.
    pub parent: Option<ObjectId>,
    pub status: ObjectStatus,
    pub title: String,
    pub priority: Priority,
    /// Ordered, duplicate-free prerequisite ids.
    pub prerequisites: Vec<ObjectId>,
    /// Worktree recorded by the last claim, if any.
    pub worktree: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub schema_version: String,
    /// Free-form markdown body.
    pub body: String,
}

impl WorkObject {
    /// Creates a new object with default status and `created = updated = now`.
    pub fn new(id: ObjectId, parent: Option<ObjectId>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        let kind = id.kind();
        Self {
            id,
            kind,
            parent,
            status: kind.default_status(),
            title: title.into(),
            priority: Priority::default(),
            prerequisites: Vec::new(),
            worktree: None,
            created: now,
            updated: now,
            schema_version: SCHEMA_VERSION.to_string(),
            body: String::new(),
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.kind == ObjectKind::Task && self.parent.is_none()
    }

    /// Validates kind, parent and status invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.id.kind() != self.kind {
            return Err(ValidationError::IdKindMismatch {
                id: self.id.clone(),
                kind: self.kind,
            });
        }
        validate_parent(&self.id, self.kind, self.parent.as_ref())?;
        if !self.kind.allows_status(self.status) {
            return Err(ValidationError::StatusNotAllowed {
                kind: self.kind,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Bumps `updated` to now, strictly after the previous value.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated = if now > self.updated {
            now
        } else {
            self.updated + Duration::nanoseconds(1)
        };
    }

    /// Replaces prerequisites, dropping duplicates while keeping first-seen order.
    pub fn set_prerequisites(&mut self, prerequisites: impl IntoIterator<Item = ObjectId>) {
        self.prerequisites = dedupe_ids(prerequisites);
    }
}

/// Checks the parent rule for `id` of `kind`.
pub fn validate_parent(
    id: &ObjectId,
    kind: ObjectKind,
    parent: Option<&ObjectId>,
) -> Result<(), ValidationError> {
    match (kind, parent) {
        (ObjectKind::Project, Some(_)) => Err(ValidationError::UnexpectedParent(kind)),
        (ObjectKind::Project, None) => Ok(()),
        (ObjectKind::Task, None) if id.is_standalone() => Ok(()),
        (ObjectKind::Task, Some(_)) if id.is_standalone() => {
            Err(ValidationError::IdKindMismatch {
                id: id.clone(),
                kind,
            })
        }
        (ObjectKind::Task, None) => Err(ValidationError::IdKindMismatch {
            id: id.clone(),
            kind,
        }),
        (_, None) => Err(ValidationError::MissingParent(kind)),
        (_, Some(parent)) => {
            let expected = kind
                .parent_kind()
                .ok_or(ValidationError::UnexpectedParent(kind))?;
            if parent.kind() != expected || parent.is_standalone() {
                return Err(ValidationError::InvalidParentKind {
                    parent: parent.clone(),
                    expected,
                });
            }
            Ok(())
        }
    }
}

pub(crate) fn dedupe_ids(ids: impl IntoIterator<Item = ObjectId>) -> Vec<ObjectId> {
    let mut out: Vec<ObjectId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
