//! Work item domain model.
//!
//! # Responsibility
//! - Define identifiers, kinds, statuses and the persisted object shape.
//! - Keep hierarchical and standalone tasks in one node type.
//!
//! # Invariants
//! - Every object is identified by a stable, kind-prefixed `ObjectId`.
//! - Objects are never hard-deleted; only their status location changes.

pub mod id;
pub mod object;
