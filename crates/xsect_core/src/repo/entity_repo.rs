//! Shared-node repository: organizations, states, references, reactions.
//!
//! # Responsibility
//! - Upsert content-addressed nodes, reusing rows with equal identity.
//! - Keep digest derivation and SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Nodes are append-only: never mutated, never deleted.
//! - A UNIQUE digest (or name) index backs every upsert, so concurrent
//!   identical submissions converge on one row.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::canon::canonical_digest;
use crate::model::reaction::{ReactionId, ResolvedReaction};
use crate::model::{OrganizationId, ReferenceId, StateId};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EntityRepoResult<T> = Result<T, EntityRepoError>;

/// Errors from shared-node persistence operations.
#[derive(Debug)]
pub enum EntityRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Node payload cannot be encoded for identity or storage.
    Encode(serde_json::Error),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted back to a valid read model.
    InvalidData(String),
}

impl Display for EntityRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode node payload: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "entity repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "entity repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "entity repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted node data: {message}"),
        }
    }
}

impl Error for EntityRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for EntityRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for EntityRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for EntityRepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Repository interface for deduplicated shared nodes.
pub trait EntityRepository {
    /// Reuses or creates the organization row with this exact name.
    fn upsert_organization(&self, name: &str) -> EntityRepoResult<OrganizationId>;
    /// Looks up an organization id by exact name.
    fn find_organization(&self, name: &str) -> EntityRepoResult<Option<OrganizationId>>;
    /// Looks up the name behind an organization id.
    fn organization_name(&self, id: OrganizationId) -> EntityRepoResult<Option<String>>;
    /// Reuses or creates the state node with this payload identity.
    fn upsert_state(&self, payload: &Value) -> EntityRepoResult<StateId>;
    /// Reuses or creates the reference node with this payload identity.
    fn upsert_reference(&self, payload: &Value) -> EntityRepoResult<ReferenceId>;
    /// Reuses or creates the reaction node with this content identity.
    fn upsert_reaction(&self, reaction: &ResolvedReaction) -> EntityRepoResult<ReactionId>;
    /// Loads one stored reaction by id.
    fn get_reaction(&self, id: ReactionId) -> EntityRepoResult<Option<ResolvedReaction>>;
    /// Upserts every state payload and maps document-local labels to ids.
    fn state_dict(
        &self,
        states: &BTreeMap<String, Value>,
    ) -> EntityRepoResult<BTreeMap<String, StateId>>;
    /// Upserts every reference payload and maps document-local labels to ids.
    fn reference_dict(
        &self,
        references: &BTreeMap<String, Value>,
    ) -> EntityRepoResult<BTreeMap<String, ReferenceId>>;
}

/// SQLite-backed shared-node repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> EntityRepoResult<Self> {
        ensure_entity_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn upsert_payload_node(&self, table: &'static str, payload: &Value) -> EntityRepoResult<Uuid> {
        let digest = canonical_digest(payload)?;
        let encoded = serde_json::to_string(payload)?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (uuid, digest, payload) VALUES (?1, ?2, ?3);"),
            params![Uuid::new_v4().to_string(), digest.as_str(), encoded.as_str()],
        )?;

        let uuid_text: String = self.conn.query_row(
            &format!("SELECT uuid FROM {table} WHERE digest = ?1;"),
            [digest.as_str()],
            |row| row.get(0),
        )?;
        parse_uuid(&uuid_text, &format!("{table}.uuid"))
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn upsert_organization(&self, name: &str) -> EntityRepoResult<OrganizationId> {
        self.conn.execute(
            "INSERT OR IGNORE INTO organizations (uuid, name) VALUES (?1, ?2);",
            params![Uuid::new_v4().to_string(), name],
        )?;

        let uuid_text: String = self.conn.query_row(
            "SELECT uuid FROM organizations WHERE name = ?1;",
            [name],
            |row| row.get(0),
        )?;
        parse_uuid(&uuid_text, "organizations.uuid")
    }

    fn find_organization(&self, name: &str) -> EntityRepoResult<Option<OrganizationId>> {
        let uuid_text: Option<String> = self
            .conn
            .query_row(
                "SELECT uuid FROM organizations WHERE name = ?1;",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        uuid_text
            .map(|value| parse_uuid(&value, "organizations.uuid"))
            .transpose()
    }

    fn organization_name(&self, id: OrganizationId) -> EntityRepoResult<Option<String>> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM organizations WHERE uuid = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn upsert_state(&self, payload: &Value) -> EntityRepoResult<StateId> {
        self.upsert_payload_node("states", payload)
    }

    fn upsert_reference(&self, payload: &Value) -> EntityRepoResult<ReferenceId> {
        self.upsert_payload_node("bib_references", payload)
    }

    fn upsert_reaction(&self, reaction: &ResolvedReaction) -> EntityRepoResult<ReactionId> {
        let digest = reaction.identity()?;
        let lhs = serde_json::to_string(&reaction.lhs)?;
        let rhs = serde_json::to_string(&reaction.rhs)?;
        let type_tags = serde_json::to_string(&reaction.type_tags)?;

        self.conn.execute(
            "INSERT OR IGNORE INTO reactions (
                uuid,
                digest,
                lhs,
                rhs,
                reversible,
                type_tags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                Uuid::new_v4().to_string(),
                digest.as_str(),
                lhs.as_str(),
                rhs.as_str(),
                bool_to_int(reaction.reversible),
                type_tags.as_str(),
            ],
        )?;

        let uuid_text: String = self.conn.query_row(
            "SELECT uuid FROM reactions WHERE digest = ?1;",
            [digest.as_str()],
            |row| row.get(0),
        )?;
        parse_uuid(&uuid_text, "reactions.uuid")
    }

    fn get_reaction(&self, id: ReactionId) -> EntityRepoResult<Option<ResolvedReaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                lhs,
                rhs,
                reversible,
                type_tags
             FROM reactions
             WHERE uuid = ?1;",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let lhs_text: String = row.get("lhs")?;
            let rhs_text: String = row.get("rhs")?;
            let tags_text: String = row.get("type_tags")?;

            let lhs = parse_side(&lhs_text, "reactions.lhs")?;
            let rhs = parse_side(&rhs_text, "reactions.rhs")?;
            let type_tags: Vec<String> = serde_json::from_str(&tags_text).map_err(|_| {
                EntityRepoError::InvalidData(format!(
                    "invalid type tags `{tags_text}` in reactions.type_tags"
                ))
            })?;

            let reversible = match row.get::<_, i64>("reversible")? {
                0 => false,
                1 => true,
                other => {
                    return Err(EntityRepoError::InvalidData(format!(
                        "invalid reversible value `{other}` in reactions.reversible"
                    )));
                }
            };

            return Ok(Some(ResolvedReaction {
                lhs,
                rhs,
                reversible,
                type_tags,
            }));
        }

        Ok(None)
    }

    fn state_dict(
        &self,
        states: &BTreeMap<String, Value>,
    ) -> EntityRepoResult<BTreeMap<String, StateId>> {
        let mut dict = BTreeMap::new();
        for (label, payload) in states {
            dict.insert(label.clone(), self.upsert_state(payload)?);
        }
        Ok(dict)
    }

    fn reference_dict(
        &self,
        references: &BTreeMap<String, Value>,
    ) -> EntityRepoResult<BTreeMap<String, ReferenceId>> {
        let mut dict = BTreeMap::new();
        for (label, payload) in references {
            dict.insert(label.clone(), self.upsert_reference(payload)?);
        }
        Ok(dict)
    }
}

fn parse_side(value: &str, column: &str) -> EntityRepoResult<Vec<(u32, StateId)>> {
    serde_json::from_str(value).map_err(|_| {
        EntityRepoError::InvalidData(format!("invalid reaction side `{value}` in {column}"))
    })
}

fn parse_uuid(value: &str, column: &str) -> EntityRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| EntityRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_entity_connection_ready(conn: &Connection) -> EntityRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(EntityRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["organizations", "states", "bib_references", "reactions"] {
        if !table_exists(conn, table)? {
            return Err(EntityRepoError::MissingRequiredTable(table));
        }
    }

    for column in ["uuid", "name"] {
        if !table_has_column(conn, "organizations", column)? {
            return Err(EntityRepoError::MissingRequiredColumn {
                table: "organizations",
                column,
            });
        }
    }

    for table in ["states", "bib_references"] {
        for column in ["uuid", "digest", "payload"] {
            if !table_has_column(conn, table, column)? {
                return Err(EntityRepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    for column in ["uuid", "digest", "lhs", "rhs", "reversible", "type_tags"] {
        if !table_has_column(conn, "reactions", column)? {
            return Err(EntityRepoError::MissingRequiredColumn {
                table: "reactions",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> EntityRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> EntityRepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
