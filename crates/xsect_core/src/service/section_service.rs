//! Cross-section lifecycle service.
//!
//! # Responsibility
//! - Drive draft/published/archived/retracted transitions for single
//!   cross sections.
//! - Enforce acting-organization ownership on mutations.
//!
//! # Invariants
//! - At most one published version per lineage: publishing archives the
//!   published predecessor inside the same transaction.
//! - Published, archived and retracted versions are content-immutable.
//! - Retraction always records a non-blank message.
//! - Cross sections are created and re-versioned through set submissions;
//!   this service only exposes the standalone transitions.

use crate::db::DbError;
use crate::model::submission::Contributor;
use crate::model::version::{SectionId, VersionStatus, VersionSummary};
use crate::repo::entity_repo::{EntityRepoError, EntityRepository, SqliteEntityRepository};
use crate::repo::lineage_repo::{
    active_successor_of, history_of, LineageError, LineageKind,
};
use crate::repo::section_repo::{
    CrossSectionRecord, NewSection, SectionContent, SectionRepoError, SectionRepository,
    SqliteSectionRepository,
};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Service error for cross-section use-cases.
#[derive(Debug)]
pub enum SectionServiceError {
    /// Target cross section does not exist.
    SectionNotFound(SectionId),
    /// A draft successor already blocks a new version of this lineage.
    DraftAlreadyExists {
        published: SectionId,
        draft: SectionId,
    },
    /// Requested transition is not allowed from the current status.
    InvalidStatus {
        id: SectionId,
        status: VersionStatus,
        operation: &'static str,
    },
    /// Retraction was requested without a usable message.
    RetractMessageRequired,
    /// Acting organization does not own the target document.
    OrganizationMismatch { id: Uuid, organization: String },
    /// Shared-node persistence failure.
    Entity(EntityRepoError),
    /// Cross-section persistence failure.
    Repo(SectionRepoError),
    /// Lineage query failure.
    Lineage(LineageError),
    /// Storage-layer failure outside the repositories.
    Db(DbError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for SectionServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SectionNotFound(id) => write!(f, "cross section not found: {id}"),
            Self::DraftAlreadyExists { published, draft } => write!(
                f,
                "cross section {published} already has draft successor {draft}"
            ),
            Self::InvalidStatus {
                id,
                status,
                operation,
            } => write!(
                f,
                "cross section {id} has status `{}`, cannot {operation}",
                status.as_db()
            ),
            Self::RetractMessageRequired => {
                write!(f, "retracting a published version requires a message")
            }
            Self::OrganizationMismatch { id, organization } => write!(
                f,
                "document {id} is not owned by organization `{organization}`"
            ),
            Self::Entity(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Lineage(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent cross section state: {details}")
            }
        }
    }
}

impl Error for SectionServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Entity(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Lineage(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SectionRepoError> for SectionServiceError {
    fn from(value: SectionRepoError) -> Self {
        match value {
            SectionRepoError::NotFound(id) => Self::SectionNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<EntityRepoError> for SectionServiceError {
    fn from(value: EntityRepoError) -> Self {
        Self::Entity(value)
    }
}

impl From<LineageError> for SectionServiceError {
    fn from(value: LineageError) -> Self {
        match value {
            LineageError::NotFound(id) => Self::SectionNotFound(id),
            other => Self::Lineage(other),
        }
    }
}

impl From<DbError> for SectionServiceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SectionServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of applying new content to one existing cross-section version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionUpdateOutcome {
    /// Content was identical; existing version reused without writes.
    Unchanged(SectionId),
    /// Draft content replaced in place.
    UpdatedInPlace(SectionId),
    /// New draft version forked from a published predecessor.
    Forked(SectionId),
}

impl SectionUpdateOutcome {
    pub(crate) fn section_id(self) -> SectionId {
        match self {
            Self::Unchanged(id) => id,
            Self::UpdatedInPlace(id) => id,
            Self::Forked(id) => id,
        }
    }
}

/// Cross-section lifecycle service bound to one open database connection.
pub struct SectionService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SectionService<'conn> {
    /// Creates a service on an open, migrated connection.
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Publishes one draft cross section.
    ///
    /// Archives the published predecessor of the lineage, if one exists, in
    /// the same transaction.
    pub fn publish_section(
        &self,
        contributor: &Contributor,
        id: SectionId,
    ) -> Result<CrossSectionRecord, SectionServiceError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let updated = {
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let entities = SqliteEntityRepository::try_new(&tx)?;
            let record = sections
                .get_section(id)?
                .ok_or(SectionServiceError::SectionNotFound(id))?;
            ensure_owner(&entities, record.uuid, record.organization_uuid, contributor)?;
            publish_draft_section(&sections, &record)?;
            sections
                .get_section(id)?
                .ok_or(SectionServiceError::InconsistentState(
                    "published cross section not found in read-back",
                ))?
        };
        tx.commit()?;
        Ok(updated)
    }

    /// Retracts one published cross section with a mandatory message.
    pub fn retract_section(
        &self,
        contributor: &Contributor,
        id: SectionId,
        message: &str,
    ) -> Result<CrossSectionRecord, SectionServiceError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SectionServiceError::RetractMessageRequired);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let updated = {
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let entities = SqliteEntityRepository::try_new(&tx)?;
            let record = sections
                .get_section(id)?
                .ok_or(SectionServiceError::SectionNotFound(id))?;
            ensure_owner(&entities, record.uuid, record.organization_uuid, contributor)?;
            if record.version_info.status != VersionStatus::Published {
                return Err(SectionServiceError::InvalidStatus {
                    id,
                    status: record.version_info.status,
                    operation: "retract",
                });
            }

            sections.set_retracted(id, message)?;
            sections
                .get_section(id)?
                .ok_or(SectionServiceError::InconsistentState(
                    "retracted cross section not found in read-back",
                ))?
        };
        tx.commit()?;
        Ok(updated)
    }

    /// Hard-deletes one draft cross section together with its links.
    pub fn discard_draft(
        &self,
        contributor: &Contributor,
        id: SectionId,
    ) -> Result<(), SectionServiceError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        {
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let entities = SqliteEntityRepository::try_new(&tx)?;
            let record = sections
                .get_section(id)?
                .ok_or(SectionServiceError::SectionNotFound(id))?;
            ensure_owner(&entities, record.uuid, record.organization_uuid, contributor)?;
            if record.version_info.status != VersionStatus::Draft {
                return Err(SectionServiceError::InvalidStatus {
                    id,
                    status: record.version_info.status,
                    operation: "discard",
                });
            }

            sections.delete_section(id)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Gets one cross-section version by id.
    pub fn get_section(
        &self,
        id: SectionId,
    ) -> Result<Option<CrossSectionRecord>, SectionServiceError> {
        let sections = SqliteSectionRepository::try_new(self.conn)?;
        Ok(sections.get_section(id)?)
    }

    /// Returns the full version history of one cross section, newest first.
    pub fn section_history(
        &self,
        id: SectionId,
    ) -> Result<Vec<VersionSummary>, SectionServiceError> {
        Ok(history_of(self.conn, LineageKind::Section, id)?)
    }

    /// Returns the nearest non-archived version reachable from this one.
    pub fn active_section_version(
        &self,
        id: SectionId,
    ) -> Result<Option<VersionSummary>, SectionServiceError> {
        Ok(active_successor_of(self.conn, LineageKind::Section, id)?)
    }
}

/// Flips one draft to published and archives its published predecessor.
///
/// Callers run this inside their own transaction.
pub(crate) fn publish_draft_section(
    sections: &SqliteSectionRepository<'_>,
    record: &CrossSectionRecord,
) -> Result<(), SectionServiceError> {
    if record.version_info.status != VersionStatus::Draft {
        return Err(SectionServiceError::InvalidStatus {
            id: record.uuid,
            status: record.version_info.status,
            operation: "publish",
        });
    }

    sections.set_status(record.uuid, VersionStatus::Published)?;

    if let Some(predecessor) = sections.direct_predecessor(record.uuid)? {
        let predecessor_record =
            sections
                .get_section(predecessor)?
                .ok_or(SectionServiceError::InconsistentState(
                    "history edge points at missing cross section",
                ))?;
        if predecessor_record.version_info.status == VersionStatus::Published {
            sections.set_status(predecessor, VersionStatus::Archived)?;
        }
    }

    Ok(())
}

/// Applies candidate content to one existing version per the lifecycle rules.
///
/// Identical content reuses the version untouched. Draft content is replaced
/// in place. Published versions fork a new draft with a history edge, unless
/// a draft successor already exists. Archived and retracted versions reject
/// the update. Callers run this inside their own transaction.
pub(crate) fn apply_section_update(
    sections: &SqliteSectionRepository<'_>,
    record: &CrossSectionRecord,
    content: &SectionContent,
    commit_message: Option<&str>,
) -> Result<SectionUpdateOutcome, SectionServiceError> {
    if record.content == *content {
        return Ok(SectionUpdateOutcome::Unchanged(record.uuid));
    }

    match record.version_info.status {
        VersionStatus::Draft => {
            sections.update_draft_content(record.uuid, content, commit_message)?;
            Ok(SectionUpdateOutcome::UpdatedInPlace(record.uuid))
        }
        VersionStatus::Published => {
            if let Some(draft) = sections.draft_successor(record.uuid)? {
                return Err(SectionServiceError::DraftAlreadyExists {
                    published: record.uuid,
                    draft,
                });
            }

            let forked = NewSection {
                uuid: Uuid::new_v4(),
                organization_uuid: record.organization_uuid,
                content: content.clone(),
                status: VersionStatus::Draft,
                version: record.version_info.version + 1,
                commit_message: commit_message.map(str::to_string),
            };
            sections.insert_section(&forked)?;
            sections.insert_history_edge(forked.uuid, record.uuid)?;
            Ok(SectionUpdateOutcome::Forked(forked.uuid))
        }
        status @ (VersionStatus::Archived | VersionStatus::Retracted) => {
            Err(SectionServiceError::InvalidStatus {
                id: record.uuid,
                status,
                operation: "update",
            })
        }
    }
}

/// Checks that the acting contributor's organization owns the document.
pub(crate) fn ensure_owner(
    entities: &SqliteEntityRepository<'_>,
    document_id: Uuid,
    owner_uuid: Uuid,
    contributor: &Contributor,
) -> Result<(), SectionServiceError> {
    let acting = entities.find_organization(&contributor.organization)?;
    if acting != Some(owner_uuid) {
        return Err(SectionServiceError::OrganizationMismatch {
            id: document_id,
            organization: contributor.organization.clone(),
        });
    }
    Ok(())
}
