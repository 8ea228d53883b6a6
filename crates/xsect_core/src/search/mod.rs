//! Full-text search entry points.
//!
//! # Responsibility
//! - Expose set discovery queries backed by the SQLite FTS5 index.
//! - Keep search result shaping inside core.

pub mod fts;
