//! Cross-section repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist versioned cross-section documents and their reference links.
//! - Keep SQL details and status/version encoding inside the persistence
//!   boundary.
//!
//! # Invariants
//! - Published, archived and retracted rows are immutable; only drafts may
//!   be updated or deleted.
//! - `section_references` rows follow submission order via `position`.
//! - History edges record `newer -> older` and each version has at most one
//!   predecessor.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::reaction::ReactionId;
use crate::model::submission::{SectionData, SectionParameters};
use crate::model::version::{SectionId, SetId, VersionInfo, VersionStatus};
use crate::model::{OrganizationId, ReferenceId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const SECTION_SELECT_SQL: &str = "SELECT
    uuid,
    reaction_uuid,
    organization_uuid,
    data,
    threshold,
    parameters,
    status,
    version,
    created_on,
    commit_message,
    retract_message
FROM cross_sections";

pub type SectionRepoResult<T> = Result<T, SectionRepoError>;

/// Errors from cross-section repository operations.
#[derive(Debug)]
pub enum SectionRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Document payload cannot be encoded for storage.
    Encode(serde_json::Error),
    /// Target cross-section row does not exist (or is not a draft for
    /// draft-only mutations).
    NotFound(SectionId),
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

impl Display for SectionRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode cross section payload: {err}"),
            Self::NotFound(id) => write!(f, "cross section not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "cross section repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "cross section repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "cross section repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => {
                write!(f, "invalid persisted cross section data: {message}")
            }
        }
    }
}

impl Error for SectionRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::NotFound(_) => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SectionRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SectionRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for SectionRepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Content fields shared by insert and draft-update paths.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionContent {
    /// Deduplicated reaction node id.
    pub reaction_uuid: ReactionId,
    /// Tabulated section data.
    pub data: SectionData,
    /// Energy threshold in eV.
    pub threshold: f64,
    /// Optional physics parameters.
    pub parameters: Option<SectionParameters>,
    /// Deduplicated reference node ids in submission order.
    pub references: Vec<ReferenceId>,
}

/// Write model for creating one cross-section version row.
#[derive(Debug, Clone)]
pub struct NewSection {
    /// Stable version id, assigned by the caller.
    pub uuid: SectionId,
    /// Owning organization node id.
    pub organization_uuid: OrganizationId,
    /// Document content.
    pub content: SectionContent,
    /// Initial lifecycle status.
    pub status: VersionStatus,
    /// Version number within the lineage, starting at 1.
    pub version: u32,
    /// Optional commit message describing this version.
    pub commit_message: Option<String>,
}

/// Read model for cross-section detail and membership use-cases.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSectionRecord {
    /// Stable version id.
    pub uuid: SectionId,
    /// Owning organization node id.
    pub organization_uuid: OrganizationId,
    /// Document content, references included.
    pub content: SectionContent,
    /// Lifecycle status and version metadata.
    pub version_info: VersionInfo,
}

/// Repository interface for cross-section persistence operations.
pub trait SectionRepository {
    /// Inserts one cross-section version row with its reference links.
    fn insert_section(&self, section: &NewSection) -> SectionRepoResult<()>;
    /// Gets one cross-section version by id.
    fn get_section(&self, id: SectionId) -> SectionRepoResult<Option<CrossSectionRecord>>;
    /// Replaces content of one draft row in place.
    fn update_draft_content(
        &self,
        id: SectionId,
        content: &SectionContent,
        commit_message: Option<&str>,
    ) -> SectionRepoResult<()>;
    /// Moves one row to the given lifecycle status.
    fn set_status(&self, id: SectionId, status: VersionStatus) -> SectionRepoResult<()>;
    /// Moves one row to retracted status and records the retract message.
    fn set_retracted(&self, id: SectionId, message: &str) -> SectionRepoResult<()>;
    /// Hard-deletes one row together with its reference and membership links.
    fn delete_section(&self, id: SectionId) -> SectionRepoResult<()>;
    /// Records a `newer -> older` history edge between two versions.
    fn insert_history_edge(&self, newer: SectionId, older: SectionId) -> SectionRepoResult<()>;
    /// Returns the direct predecessor version, if any.
    fn direct_predecessor(&self, id: SectionId) -> SectionRepoResult<Option<SectionId>>;
    /// Returns a direct successor that is still a draft, if any.
    fn draft_successor(&self, id: SectionId) -> SectionRepoResult<Option<SectionId>>;
    /// Lists all member cross-sections of one set in stable order.
    fn list_in_set(&self, set_id: SetId) -> SectionRepoResult<Vec<CrossSectionRecord>>;
}

/// SQLite-backed cross-section repository.
pub struct SqliteSectionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSectionRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> SectionRepoResult<Self> {
        ensure_section_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl SectionRepository for SqliteSectionRepository<'_> {
    fn insert_section(&self, section: &NewSection) -> SectionRepoResult<()> {
        let data = serde_json::to_string(&section.content.data)?;
        let parameters = section
            .content
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO cross_sections (
                uuid,
                reaction_uuid,
                organization_uuid,
                data,
                threshold,
                parameters,
                status,
                version,
                commit_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                section.uuid.to_string(),
                section.content.reaction_uuid.to_string(),
                section.organization_uuid.to_string(),
                data.as_str(),
                section.content.threshold,
                parameters.as_deref(),
                section.status.as_db(),
                section.version,
                section.commit_message.as_deref(),
            ],
        )?;

        replace_references(self.conn, section.uuid, &section.content.references)
    }

    fn get_section(&self, id: SectionId) -> SectionRepoResult<Option<CrossSectionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SECTION_SELECT_SQL} WHERE uuid = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let mut record = parse_section_row(row)?;
            record.content.references = load_references_for_section(self.conn, record.uuid)?;
            return Ok(Some(record));
        }

        Ok(None)
    }

    fn update_draft_content(
        &self,
        id: SectionId,
        content: &SectionContent,
        commit_message: Option<&str>,
    ) -> SectionRepoResult<()> {
        let data = serde_json::to_string(&content.data)?;
        let parameters = content
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let changed = self.conn.execute(
            "UPDATE cross_sections
             SET
                reaction_uuid = ?2,
                data = ?3,
                threshold = ?4,
                parameters = ?5,
                commit_message = ?6
             WHERE uuid = ?1
               AND status = 'draft';",
            params![
                id.to_string(),
                content.reaction_uuid.to_string(),
                data.as_str(),
                content.threshold,
                parameters.as_deref(),
                commit_message,
            ],
        )?;

        if changed == 0 {
            return Err(SectionRepoError::NotFound(id));
        }

        replace_references(self.conn, id, &content.references)
    }

    fn set_status(&self, id: SectionId, status: VersionStatus) -> SectionRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cross_sections SET status = ?2 WHERE uuid = ?1;",
            params![id.to_string(), status.as_db()],
        )?;

        if changed == 0 {
            return Err(SectionRepoError::NotFound(id));
        }

        Ok(())
    }

    fn set_retracted(&self, id: SectionId, message: &str) -> SectionRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cross_sections
             SET status = 'retracted', retract_message = ?2
             WHERE uuid = ?1;",
            params![id.to_string(), message],
        )?;

        if changed == 0 {
            return Err(SectionRepoError::NotFound(id));
        }

        Ok(())
    }

    fn delete_section(&self, id: SectionId) -> SectionRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM cross_sections WHERE uuid = ?1;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(SectionRepoError::NotFound(id));
        }

        Ok(())
    }

    fn insert_history_edge(&self, newer: SectionId, older: SectionId) -> SectionRepoResult<()> {
        self.conn.execute(
            "INSERT INTO section_history (newer_uuid, older_uuid) VALUES (?1, ?2);",
            params![newer.to_string(), older.to_string()],
        )?;
        Ok(())
    }

    fn direct_predecessor(&self, id: SectionId) -> SectionRepoResult<Option<SectionId>> {
        let older: Option<String> = self
            .conn
            .query_row(
                "SELECT older_uuid FROM section_history WHERE newer_uuid = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        older
            .map(|value| parse_uuid(&value, "section_history.older_uuid"))
            .transpose()
    }

    fn draft_successor(&self, id: SectionId) -> SectionRepoResult<Option<SectionId>> {
        let newer: Option<String> = self
            .conn
            .query_row(
                "SELECT edge.newer_uuid
                 FROM section_history edge
                 INNER JOIN cross_sections successor ON successor.uuid = edge.newer_uuid
                 WHERE edge.older_uuid = ?1
                   AND successor.status = 'draft'
                 ORDER BY successor.uuid ASC
                 LIMIT 1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        newer
            .map(|value| parse_uuid(&value, "section_history.newer_uuid"))
            .transpose()
    }

    fn list_in_set(&self, set_id: SetId) -> SectionRepoResult<Vec<CrossSectionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SECTION_SELECT_SQL}
             INNER JOIN set_members ON set_members.section_uuid = cross_sections.uuid
             WHERE set_members.set_uuid = ?1
             ORDER BY cross_sections.created_on ASC, cross_sections.uuid ASC;"
        ))?;

        let mut rows = stmt.query([set_id.to_string()])?;
        let mut sections = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = parse_section_row(row)?;
            record.content.references = load_references_for_section(self.conn, record.uuid)?;
            sections.push(record);
        }

        Ok(sections)
    }
}

fn parse_section_row(row: &Row<'_>) -> SectionRepoResult<CrossSectionRecord> {
    let uuid_text: String = row.get("uuid")?;
    let reaction_text: String = row.get("reaction_uuid")?;
    let organization_text: String = row.get("organization_uuid")?;
    let data_text: String = row.get("data")?;
    let parameters_text: Option<String> = row.get("parameters")?;
    let status_text: String = row.get("status")?;

    let data: SectionData = serde_json::from_str(&data_text).map_err(|_| {
        SectionRepoError::InvalidData("invalid data payload in cross_sections.data".to_string())
    })?;
    let parameters: Option<SectionParameters> = parameters_text
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|_| {
            SectionRepoError::InvalidData(
                "invalid parameters payload in cross_sections.parameters".to_string(),
            )
        })?;
    let status = VersionStatus::parse(&status_text).ok_or_else(|| {
        SectionRepoError::InvalidData(format!(
            "invalid status value `{status_text}` in cross_sections.status"
        ))
    })?;

    Ok(CrossSectionRecord {
        uuid: parse_uuid(&uuid_text, "cross_sections.uuid")?,
        organization_uuid: parse_uuid(&organization_text, "cross_sections.organization_uuid")?,
        content: SectionContent {
            reaction_uuid: parse_uuid(&reaction_text, "cross_sections.reaction_uuid")?,
            data,
            threshold: row.get("threshold")?,
            parameters,
            references: Vec::new(),
        },
        version_info: VersionInfo {
            status,
            version: row.get("version")?,
            created_on: row.get("created_on")?,
            commit_message: row.get("commit_message")?,
            retract_message: row.get("retract_message")?,
        },
    })
}

fn load_references_for_section(
    conn: &Connection,
    section_uuid: SectionId,
) -> SectionRepoResult<Vec<ReferenceId>> {
    let mut stmt = conn.prepare(
        "SELECT reference_uuid
         FROM section_references
         WHERE section_uuid = ?1
         ORDER BY position ASC;",
    )?;

    let mut rows = stmt.query([section_uuid.to_string()])?;
    let mut references = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        references.push(parse_uuid(&value, "section_references.reference_uuid")?);
    }

    Ok(references)
}

fn replace_references(
    conn: &Connection,
    section_uuid: SectionId,
    references: &[ReferenceId],
) -> SectionRepoResult<()> {
    let section_text = section_uuid.to_string();
    conn.execute(
        "DELETE FROM section_references WHERE section_uuid = ?1;",
        [section_text.as_str()],
    )?;

    for (position, reference) in references.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO section_references (
                section_uuid,
                reference_uuid,
                position
            ) VALUES (?1, ?2, ?3);",
            params![
                section_text.as_str(),
                reference.to_string(),
                position as i64
            ],
        )?;
    }

    Ok(())
}

fn parse_uuid(value: &str, column: &str) -> SectionRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| SectionRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_section_connection_ready(conn: &Connection) -> SectionRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(SectionRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in [
        "cross_sections",
        "section_references",
        "section_history",
        "set_members",
    ] {
        if !table_exists(conn, table)? {
            return Err(SectionRepoError::MissingRequiredTable(table));
        }
    }

    for column in [
        "uuid",
        "reaction_uuid",
        "organization_uuid",
        "data",
        "threshold",
        "parameters",
        "status",
        "version",
        "created_on",
        "commit_message",
        "retract_message",
    ] {
        if !table_has_column(conn, "cross_sections", column)? {
            return Err(SectionRepoError::MissingRequiredColumn {
                table: "cross_sections",
                column,
            });
        }
    }

    for column in ["section_uuid", "reference_uuid", "position"] {
        if !table_has_column(conn, "section_references", column)? {
            return Err(SectionRepoError::MissingRequiredColumn {
                table: "section_references",
                column,
            });
        }
    }

    for column in ["newer_uuid", "older_uuid"] {
        if !table_has_column(conn, "section_history", column)? {
            return Err(SectionRepoError::MissingRequiredColumn {
                table: "section_history",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> SectionRepoResult<bool> {
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

fn table_has_column(conn: &Connection, table: &str, column: &str) -> SectionRepoResult<bool> {
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
