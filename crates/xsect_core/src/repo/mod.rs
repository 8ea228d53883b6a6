//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for shared graph nodes and versioned
//!   documents.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories never open transactions; services own the unit of work
//!   and bind repositories to it.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod entity_repo;
pub mod lineage_repo;
pub mod section_repo;
pub mod set_repo;
