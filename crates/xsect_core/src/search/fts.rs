//! SQLite FTS5-based set discovery.
//!
//! # Responsibility
//! - Provide keyword search over set names and descriptions.
//! - Return typed hits with stable IDs.
//!
//! # Invariants
//! - Hits are always restricted to one lifecycle status; published is the
//!   default, so archived and draft versions never leak into discovery.
//! - Result ordering is deterministic by rank, then `created_on`, then id.

use crate::db::DbError;
use crate::model::version::{SetId, VersionStatus};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search-layer error for query parsing, DB interaction and result decoding.
#[derive(Debug)]
pub enum SearchError {
    /// User-provided query cannot be parsed by FTS5 syntax.
    InvalidQuery { query: String, message: String },
    Db(DbError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidQuery { .. } => None,
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Search options for set discovery queries.
#[derive(Debug, Clone)]
pub struct SetSearchQuery {
    /// User query text.
    pub text: String,
    /// Lifecycle status the hits must have.
    pub status: VersionStatus,
    /// Maximum number of hits to return.
    pub limit: u32,
    /// Whether to pass text directly as raw FTS5 expression.
    ///
    /// Default is `false` to protect type-as-you-search UX from syntax errors.
    pub raw_fts_syntax: bool,
}

impl SetSearchQuery {
    /// Creates a published-only query with default pagination.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: VersionStatus::Published,
            limit: 20,
            raw_fts_syntax: false,
        }
    }
}

/// Single search hit returned by [`search_sets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSearchHit {
    pub set_id: SetId,
    pub name: String,
    pub snippet: String,
}

/// Searches sets via FTS5 and returns ranked results.
///
/// Returns an empty list for blank queries.
pub fn search_sets(conn: &Connection, query: &SetSearchQuery) -> SearchResult<Vec<SetSearchHit>> {
    let Some(match_expr) = build_match_expression(query)? else {
        return Ok(Vec::new());
    };

    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let sql = "SELECT
            sets.uuid AS uuid,
            sets.name AS name,
            snippet(set_search, 1, '[', ']', ' ... ', 10) AS snippet
         FROM set_search
         JOIN cross_section_sets sets ON sets.rowid = set_search.rowid
         WHERE set_search MATCH ?
           AND sets.status = ?
         ORDER BY bm25(set_search), sets.created_on DESC, sets.uuid ASC LIMIT ?";
    let bind_values: Vec<Value> = vec![
        Value::Text(match_expr.clone()),
        Value::Text(query.status.as_db().to_string()),
        Value::Integer(i64::from(query.limit)),
    ];

    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt
        .query(params_from_iter(bind_values))
        .map_err(|err| map_query_error(err, &match_expr))?;
    let mut hits = Vec::new();

    while let Some(row) = rows
        .next()
        .map_err(|err| map_query_error(err, &match_expr))?
    {
        hits.push(parse_search_hit(row)?);
    }

    Ok(hits)
}

fn parse_search_hit(row: &Row<'_>) -> SearchResult<SetSearchHit> {
    let uuid_text: String = row.get("uuid")?;
    let set_id = Uuid::parse_str(&uuid_text)
        .map_err(|_| SearchError::InvalidData(format!("invalid uuid `{uuid_text}`")))?;

    Ok(SetSearchHit {
        set_id,
        name: row.get("name")?,
        snippet: row.get("snippet")?,
    })
}

fn build_match_expression(query: &SetSearchQuery) -> SearchResult<Option<String>> {
    let text = query.text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if query.raw_fts_syntax {
        return Ok(Some(text.to_string()));
    }

    let terms = text
        .split_whitespace()
        .filter(|term| !term.is_empty())
        .map(escape_fts_term)
        .collect::<Vec<_>>();

    if terms.is_empty() {
        return Ok(None);
    }

    Ok(Some(terms.join(" AND ")))
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }

    SearchError::Db(DbError::Sqlite(err))
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}
