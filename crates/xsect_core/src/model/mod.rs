//! Domain model for versioned cross-section documents and shared nodes.
//!
//! # Responsibility
//! - Define the submission document shape and its structural validation.
//! - Define version lifecycle metadata shared by items and sets.
//! - Derive content identity for deduplicated graph nodes.
//!
//! # Invariants
//! - Every node and versioned document is identified by a stable UUID.
//! - Node identity is content-derived; nodes are never mutated in place.

use uuid::Uuid;

pub mod canon;
pub mod reaction;
pub mod submission;
pub mod version;

/// Stable identifier for organization nodes.
pub type OrganizationId = Uuid;

/// Stable identifier for state nodes.
pub type StateId = Uuid;

/// Stable identifier for bibliographic reference nodes.
pub type ReferenceId = Uuid;
