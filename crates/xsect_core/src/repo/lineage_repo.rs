//! Version lineage queries over history edges.
//!
//! # Responsibility
//! - Walk `newer -> older` history chains for cross-sections and sets.
//! - Answer "full history of" and "currently active descendant of" lookups.
//!
//! # Invariants
//! - History edges form an acyclic chain set: every edge points from a newer
//!   version to an older one and newer ids are unique.
//! - `history_of` returns the seed version first, then strictly older ones.
//! - `active_successor_of` is inclusive: a non-archived seed answers itself.

use crate::db::DbError;
use crate::model::version::{VersionStatus, VersionSummary};
use rusqlite::{Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type LineageResult<T> = Result<T, LineageError>;

/// Errors from lineage query operations.
#[derive(Debug)]
pub enum LineageError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Seed version does not exist.
    NotFound(Uuid),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for LineageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "version not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted lineage data: {message}"),
        }
    }
}

impl Error for LineageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for LineageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LineageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Selects which document family a lineage query walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageKind {
    /// Cross-section version chains.
    Section,
    /// Cross-section set version chains.
    Set,
}

impl LineageKind {
    fn history_table(self) -> &'static str {
        match self {
            Self::Section => "section_history",
            Self::Set => "set_history",
        }
    }

    fn document_table(self) -> &'static str {
        match self {
            Self::Section => "cross_sections",
            Self::Set => "cross_section_sets",
        }
    }
}

/// Returns the full version history of one document, newest first.
///
/// The seed version is included as the first entry; entries after it follow
/// predecessor edges down to the oldest version.
pub fn history_of(
    conn: &Connection,
    kind: LineageKind,
    id: Uuid,
) -> LineageResult<Vec<VersionSummary>> {
    let history = kind.history_table();
    let document = kind.document_table();

    let mut stmt = conn.prepare(&format!(
        "WITH RECURSIVE lineage(uuid, depth) AS (
            SELECT uuid, 0
            FROM {document}
            WHERE uuid = ?1
            UNION ALL
            SELECT edge.older_uuid, lineage.depth + 1
            FROM {history} edge
            INNER JOIN lineage ON edge.newer_uuid = lineage.uuid
        )
        SELECT
            d.uuid,
            d.status,
            d.version,
            d.created_on,
            d.commit_message,
            d.retract_message
        FROM lineage
        INNER JOIN {document} d ON d.uuid = lineage.uuid
        ORDER BY lineage.depth ASC;"
    ))?;

    let mut rows = stmt.query([id.to_string()])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(parse_summary_row(row, kind)?);
    }

    if entries.is_empty() {
        return Err(LineageError::NotFound(id));
    }

    Ok(entries)
}

/// Returns the closest non-archived version reachable from the seed by
/// following successor edges, the seed itself included.
///
/// Branching lineages resolve deterministically: nearest depth first, then
/// lowest id.
pub fn active_successor_of(
    conn: &Connection,
    kind: LineageKind,
    id: Uuid,
) -> LineageResult<Option<VersionSummary>> {
    let history = kind.history_table();
    let document = kind.document_table();

    if !document_exists(conn, kind, id)? {
        return Err(LineageError::NotFound(id));
    }

    let mut stmt = conn.prepare(&format!(
        "WITH RECURSIVE lineage(uuid, depth) AS (
            SELECT uuid, 0
            FROM {document}
            WHERE uuid = ?1
            UNION ALL
            SELECT edge.newer_uuid, lineage.depth + 1
            FROM {history} edge
            INNER JOIN lineage ON edge.older_uuid = lineage.uuid
        )
        SELECT
            d.uuid,
            d.status,
            d.version,
            d.created_on,
            d.commit_message,
            d.retract_message
        FROM lineage
        INNER JOIN {document} d ON d.uuid = lineage.uuid
        WHERE d.status != 'archived'
        ORDER BY lineage.depth ASC, d.uuid ASC
        LIMIT 1;"
    ))?;

    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_summary_row(row, kind)?));
    }

    Ok(None)
}

fn document_exists(conn: &Connection, kind: LineageKind, id: Uuid) -> LineageResult<bool> {
    let document = kind.document_table();
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(
                SELECT 1
                FROM {document}
                WHERE uuid = ?1
            );"
        ),
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_summary_row(row: &Row<'_>, kind: LineageKind) -> LineageResult<VersionSummary> {
    let document = kind.document_table();
    let uuid_text: String = row.get("uuid")?;
    let status_text: String = row.get("status")?;

    let id = Uuid::parse_str(&uuid_text).map_err(|_| {
        LineageError::InvalidData(format!("invalid uuid `{uuid_text}` in {document}.uuid"))
    })?;
    let status = VersionStatus::parse(&status_text).ok_or_else(|| {
        LineageError::InvalidData(format!(
            "invalid status value `{status_text}` in {document}.status"
        ))
    })?;

    Ok(VersionSummary {
        id,
        status,
        version: row.get("version")?,
        created_on: row.get("created_on")?,
        commit_message: row.get("commit_message")?,
        retract_message: row.get("retract_message")?,
    })
}
