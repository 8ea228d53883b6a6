//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own the transaction boundary: every multi-step mutation runs inside one
//!   immediate transaction on the service connection.

pub mod section_service;
pub mod set_service;
