//! Cross-section set repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist versioned set documents, membership links and set history.
//! - Keep SQL details and status/version encoding inside the persistence
//!   boundary.
//!
//! # Invariants
//! - Published, archived and retracted rows are immutable; only drafts may
//!   be updated or deleted.
//! - `replace_members` swaps the whole membership of one set.
//! - History edges record `newer -> older`; each version has at most one
//!   predecessor and at most one successor.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::version::{SectionId, SetId, VersionInfo, VersionStatus};
use crate::model::OrganizationId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const SET_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    description,
    complete,
    organization_uuid,
    status,
    version,
    created_on,
    commit_message,
    retract_message
FROM cross_section_sets";

pub type SetRepoResult<T> = Result<T, SetRepoError>;

/// Errors from cross-section set repository operations.
#[derive(Debug)]
pub enum SetRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target set row does not exist (or is not a draft for draft-only
    /// mutations).
    NotFound(SetId),
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
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for SetRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "cross section set not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "set repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "set repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "set repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted set data: {message}"),
        }
    }
}

impl Error for SetRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SetRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SetRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Write model for creating one set version row.
#[derive(Debug, Clone)]
pub struct NewSet {
    /// Stable version id, assigned by the caller.
    pub uuid: SetId,
    /// Human-facing set name.
    pub name: String,
    /// Free-form set description.
    pub description: String,
    /// Completeness claim for the described plasma chemistry.
    pub complete: bool,
    /// Owning organization node id.
    pub organization_uuid: OrganizationId,
    /// Initial lifecycle status.
    pub status: VersionStatus,
    /// Version number within the lineage, starting at 1.
    pub version: u32,
    /// Optional commit message describing this version.
    pub commit_message: Option<String>,
}

/// Read model for set detail and listing use-cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossSectionSetRecord {
    /// Stable version id.
    pub uuid: SetId,
    /// Human-facing set name.
    pub name: String,
    /// Free-form set description.
    pub description: String,
    /// Completeness claim for the described plasma chemistry.
    pub complete: bool,
    /// Owning organization node id.
    pub organization_uuid: OrganizationId,
    /// Lifecycle status and version metadata.
    pub version_info: VersionInfo,
}

/// Repository interface for set persistence operations.
pub trait SetRepository {
    /// Inserts one set version row.
    fn insert_set(&self, set: &NewSet) -> SetRepoResult<()>;
    /// Gets one set version by id.
    fn get_set(&self, id: SetId) -> SetRepoResult<Option<CrossSectionSetRecord>>;
    /// Replaces header fields of one draft row in place.
    fn update_draft_header(
        &self,
        id: SetId,
        name: &str,
        description: &str,
        complete: bool,
        commit_message: Option<&str>,
    ) -> SetRepoResult<()>;
    /// Moves one row to the given lifecycle status.
    fn set_status(&self, id: SetId, status: VersionStatus) -> SetRepoResult<()>;
    /// Moves one row to retracted status and records the retract message.
    fn set_retracted(&self, id: SetId, message: &str) -> SetRepoResult<()>;
    /// Hard-deletes one row together with its membership links.
    fn delete_set(&self, id: SetId) -> SetRepoResult<()>;
    /// Records a `newer -> older` history edge between two versions.
    fn insert_history_edge(&self, newer: SetId, older: SetId) -> SetRepoResult<()>;
    /// Returns the direct successor version, if any.
    fn direct_successor(&self, id: SetId) -> SetRepoResult<Option<SetId>>;
    /// Returns the direct predecessor version, if any.
    fn direct_predecessor(&self, id: SetId) -> SetRepoResult<Option<SetId>>;
    /// Replaces the whole membership of one set.
    fn replace_members(&self, set_id: SetId, members: &[SectionId]) -> SetRepoResult<()>;
    /// Lists member cross-section ids of one set in stable order.
    fn list_members(&self, set_id: SetId) -> SetRepoResult<Vec<SectionId>>;
    /// Counts how many sets link one cross-section.
    fn membership_count(&self, section_id: SectionId) -> SetRepoResult<u32>;
    /// Lists all set versions owned by one organization, newest first.
    fn list_by_organization(
        &self,
        organization_uuid: OrganizationId,
    ) -> SetRepoResult<Vec<CrossSectionSetRecord>>;
}

/// SQLite-backed set repository.
pub struct SqliteSetRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSetRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> SetRepoResult<Self> {
        ensure_set_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl SetRepository for SqliteSetRepository<'_> {
    fn insert_set(&self, set: &NewSet) -> SetRepoResult<()> {
        self.conn.execute(
            "INSERT INTO cross_section_sets (
                uuid,
                name,
                description,
                complete,
                organization_uuid,
                status,
                version,
                commit_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                set.uuid.to_string(),
                set.name.as_str(),
                set.description.as_str(),
                bool_to_int(set.complete),
                set.organization_uuid.to_string(),
                set.status.as_db(),
                set.version,
                set.commit_message.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn get_set(&self, id: SetId) -> SetRepoResult<Option<CrossSectionSetRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SET_SELECT_SQL} WHERE uuid = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_set_row(row)?));
        }

        Ok(None)
    }

    fn update_draft_header(
        &self,
        id: SetId,
        name: &str,
        description: &str,
        complete: bool,
        commit_message: Option<&str>,
    ) -> SetRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cross_section_sets
             SET
                name = ?2,
                description = ?3,
                complete = ?4,
                commit_message = ?5
             WHERE uuid = ?1
               AND status = 'draft';",
            params![
                id.to_string(),
                name,
                description,
                bool_to_int(complete),
                commit_message,
            ],
        )?;

        if changed == 0 {
            return Err(SetRepoError::NotFound(id));
        }

        Ok(())
    }

    fn set_status(&self, id: SetId, status: VersionStatus) -> SetRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cross_section_sets SET status = ?2 WHERE uuid = ?1;",
            params![id.to_string(), status.as_db()],
        )?;

        if changed == 0 {
            return Err(SetRepoError::NotFound(id));
        }

        Ok(())
    }

    fn set_retracted(&self, id: SetId, message: &str) -> SetRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cross_section_sets
             SET status = 'retracted', retract_message = ?2
             WHERE uuid = ?1;",
            params![id.to_string(), message],
        )?;

        if changed == 0 {
            return Err(SetRepoError::NotFound(id));
        }

        Ok(())
    }

    fn delete_set(&self, id: SetId) -> SetRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM cross_section_sets WHERE uuid = ?1;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(SetRepoError::NotFound(id));
        }

        Ok(())
    }

    fn insert_history_edge(&self, newer: SetId, older: SetId) -> SetRepoResult<()> {
        self.conn.execute(
            "INSERT INTO set_history (newer_uuid, older_uuid) VALUES (?1, ?2);",
            params![newer.to_string(), older.to_string()],
        )?;
        Ok(())
    }

    fn direct_successor(&self, id: SetId) -> SetRepoResult<Option<SetId>> {
        let newer: Option<String> = self
            .conn
            .query_row(
                "SELECT newer_uuid FROM set_history WHERE older_uuid = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        newer
            .map(|value| parse_uuid(&value, "set_history.newer_uuid"))
            .transpose()
    }

    fn direct_predecessor(&self, id: SetId) -> SetRepoResult<Option<SetId>> {
        let older: Option<String> = self
            .conn
            .query_row(
                "SELECT older_uuid FROM set_history WHERE newer_uuid = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        older
            .map(|value| parse_uuid(&value, "set_history.older_uuid"))
            .transpose()
    }

    fn replace_members(&self, set_id: SetId, members: &[SectionId]) -> SetRepoResult<()> {
        let set_text = set_id.to_string();
        self.conn.execute(
            "DELETE FROM set_members WHERE set_uuid = ?1;",
            [set_text.as_str()],
        )?;

        for member in members {
            self.conn.execute(
                "INSERT OR IGNORE INTO set_members (section_uuid, set_uuid) VALUES (?1, ?2);",
                params![member.to_string(), set_text.as_str()],
            )?;
        }

        Ok(())
    }

    fn list_members(&self, set_id: SetId) -> SetRepoResult<Vec<SectionId>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.section_uuid
             FROM set_members m
             INNER JOIN cross_sections s ON s.uuid = m.section_uuid
             WHERE m.set_uuid = ?1
             ORDER BY s.created_on ASC, s.uuid ASC;",
        )?;

        let mut rows = stmt.query([set_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            members.push(parse_uuid(&value, "set_members.section_uuid")?);
        }

        Ok(members)
    }

    fn membership_count(&self, section_id: SectionId) -> SetRepoResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM set_members WHERE section_uuid = ?1;",
            [section_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list_by_organization(
        &self,
        organization_uuid: OrganizationId,
    ) -> SetRepoResult<Vec<CrossSectionSetRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SET_SELECT_SQL}
             WHERE organization_uuid = ?1
             ORDER BY created_on DESC, uuid ASC;"
        ))?;

        let mut rows = stmt.query([organization_uuid.to_string()])?;
        let mut sets = Vec::new();
        while let Some(row) = rows.next()? {
            sets.push(parse_set_row(row)?);
        }

        Ok(sets)
    }
}

fn parse_set_row(row: &Row<'_>) -> SetRepoResult<CrossSectionSetRecord> {
    let uuid_text: String = row.get("uuid")?;
    let organization_text: String = row.get("organization_uuid")?;
    let status_text: String = row.get("status")?;

    let status = VersionStatus::parse(&status_text).ok_or_else(|| {
        SetRepoError::InvalidData(format!(
            "invalid status value `{status_text}` in cross_section_sets.status"
        ))
    })?;

    let complete = match row.get::<_, i64>("complete")? {
        0 => false,
        1 => true,
        other => {
            return Err(SetRepoError::InvalidData(format!(
                "invalid complete value `{other}` in cross_section_sets.complete"
            )));
        }
    };

    Ok(CrossSectionSetRecord {
        uuid: parse_uuid(&uuid_text, "cross_section_sets.uuid")?,
        name: row.get("name")?,
        description: row.get("description")?,
        complete,
        organization_uuid: parse_uuid(&organization_text, "cross_section_sets.organization_uuid")?,
        version_info: VersionInfo {
            status,
            version: row.get("version")?,
            created_on: row.get("created_on")?,
            commit_message: row.get("commit_message")?,
            retract_message: row.get("retract_message")?,
        },
    })
}

fn parse_uuid(value: &str, column: &str) -> SetRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| SetRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_set_connection_ready(conn: &Connection) -> SetRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(SetRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["cross_section_sets", "set_members", "set_history"] {
        if !table_exists(conn, table)? {
            return Err(SetRepoError::MissingRequiredTable(table));
        }
    }

    for column in [
        "uuid",
        "name",
        "description",
        "complete",
        "organization_uuid",
        "status",
        "version",
        "created_on",
        "commit_message",
        "retract_message",
    ] {
        if !table_has_column(conn, "cross_section_sets", column)? {
            return Err(SetRepoError::MissingRequiredColumn {
                table: "cross_section_sets",
                column,
            });
        }
    }

    for column in ["section_uuid", "set_uuid"] {
        if !table_has_column(conn, "set_members", column)? {
            return Err(SetRepoError::MissingRequiredColumn {
                table: "set_members",
                column,
            });
        }
    }

    for column in ["newer_uuid", "older_uuid"] {
        if !table_has_column(conn, "set_history", column)? {
            return Err(SetRepoError::MissingRequiredColumn {
                table: "set_history",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> SetRepoResult<bool> {
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

fn table_has_column(conn: &Connection, table: &str, column: &str) -> SetRepoResult<bool> {
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
