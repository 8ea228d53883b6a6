//! Cross-section set lifecycle service.
//!
//! # Responsibility
//! - Turn validated submissions into deduplicated shared nodes plus
//!   versioned documents, one transaction per operation.
//! - Drive the set state machine: in-place draft update, published fork,
//!   publish cascade, delete/retract.
//!
//! # Invariants
//! - Per process, unchanged content reuses the existing member id verbatim.
//! - Publishing a set publishes its still-draft members and archives the
//!   prior published version of every touched lineage.
//! - A fully unchanged update is a no-op returning the same id.
//! - Submissions only act on sets owned by the contributor's organization.

use crate::db::DbError;
use crate::model::reaction::{resolve_reaction, ReactionResolveError};
use crate::model::submission::{Contributor, ProcessSubmission, SetSubmission, SubmissionError};
use crate::model::version::{SectionId, SetId, VersionStatus, VersionSummary};
use crate::model::{ReferenceId, StateId};
use crate::repo::entity_repo::{EntityRepoError, EntityRepository, SqliteEntityRepository};
use crate::repo::lineage_repo::{active_successor_of, history_of, LineageError, LineageKind};
use crate::repo::section_repo::{
    CrossSectionRecord, NewSection, SectionContent, SectionRepoError, SectionRepository,
    SqliteSectionRepository,
};
use crate::repo::set_repo::{
    CrossSectionSetRecord, NewSet, SetRepoError, SetRepository, SqliteSetRepository,
};
use crate::service::section_service::{
    apply_section_update, publish_draft_section, SectionServiceError, SectionUpdateOutcome,
};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Service error for cross-section set use-cases.
#[derive(Debug)]
pub enum SetServiceError {
    /// Target set does not exist.
    SetNotFound(SetId),
    /// A draft successor already blocks a new version of this lineage.
    DraftAlreadyExists { published: SetId, draft: SetId },
    /// Requested transition is not allowed from the current status.
    InvalidStatus {
        id: SetId,
        status: VersionStatus,
        operation: &'static str,
    },
    /// New sets can only start as draft or published.
    UnsupportedInitialStatus(VersionStatus),
    /// Acting organization does not own the target document.
    OrganizationMismatch { id: Uuid, organization: String },
    /// Deleting a published set was requested without a usable message.
    RetractMessageRequired,
    /// Submission document failed structural validation.
    Validation(SubmissionError),
    /// Member cross-section transition failure.
    Section(SectionServiceError),
    /// Shared-node persistence failure.
    Entity(EntityRepoError),
    /// Set persistence failure.
    SetRepo(SetRepoError),
    /// Cross-section persistence failure.
    SectionRepo(SectionRepoError),
    /// Lineage query failure.
    Lineage(LineageError),
    /// Storage-layer failure outside the repositories.
    Db(DbError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for SetServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetNotFound(id) => write!(f, "cross section set not found: {id}"),
            Self::DraftAlreadyExists { published, draft } => {
                write!(f, "set {published} already has draft successor {draft}")
            }
            Self::InvalidStatus {
                id,
                status,
                operation,
            } => write!(
                f,
                "set {id} has status `{}`, cannot {operation}",
                status.as_db()
            ),
            Self::UnsupportedInitialStatus(status) => write!(
                f,
                "new sets must start as draft or published, got `{}`",
                status.as_db()
            ),
            Self::OrganizationMismatch { id, organization } => write!(
                f,
                "document {id} is not owned by organization `{organization}`"
            ),
            Self::RetractMessageRequired => {
                write!(f, "deleting a published set requires a retract message")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Section(err) => write!(f, "{err}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::SetRepo(err) => write!(f, "{err}"),
            Self::SectionRepo(err) => write!(f, "{err}"),
            Self::Lineage(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent set state: {details}"),
        }
    }
}

impl Error for SetServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Section(err) => Some(err),
            Self::Entity(err) => Some(err),
            Self::SetRepo(err) => Some(err),
            Self::SectionRepo(err) => Some(err),
            Self::Lineage(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SubmissionError> for SetServiceError {
    fn from(value: SubmissionError) -> Self {
        Self::Validation(value)
    }
}

impl From<SectionServiceError> for SetServiceError {
    fn from(value: SectionServiceError) -> Self {
        Self::Section(value)
    }
}

impl From<EntityRepoError> for SetServiceError {
    fn from(value: EntityRepoError) -> Self {
        Self::Entity(value)
    }
}

impl From<SetRepoError> for SetServiceError {
    fn from(value: SetRepoError) -> Self {
        match value {
            SetRepoError::NotFound(id) => Self::SetNotFound(id),
            other => Self::SetRepo(other),
        }
    }
}

impl From<SectionRepoError> for SetServiceError {
    fn from(value: SectionRepoError) -> Self {
        Self::SectionRepo(value)
    }
}

impl From<LineageError> for SetServiceError {
    fn from(value: LineageError) -> Self {
        match value {
            LineageError::NotFound(id) => Self::SetNotFound(id),
            other => Self::Lineage(other),
        }
    }
}

impl From<DbError> for SetServiceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SetServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Set header together with its member cross sections.
#[derive(Debug, Clone, PartialEq)]
pub struct SetDetail {
    pub set: CrossSectionSetRecord,
    /// Member documents pinned to this set version, in stable order.
    pub members: Vec<CrossSectionRecord>,
}

/// Cross-section set lifecycle service bound to one open database connection.
pub struct SetService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SetService<'conn> {
    /// Creates a service on an open, migrated connection.
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Creates a new set at version 1 from one validated submission.
    ///
    /// Every process becomes a member cross section in the same status as
    /// the set. Shared nodes (organization, states, references, reactions)
    /// are reused by content identity.
    pub fn create_set(
        &self,
        submission: &SetSubmission,
        status: VersionStatus,
        commit_message: Option<&str>,
    ) -> Result<SetId, SetServiceError> {
        submission.validate()?;
        if !matches!(status, VersionStatus::Draft | VersionStatus::Published) {
            return Err(SetServiceError::UnsupportedInitialStatus(status));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let set_id = {
            let entities = SqliteEntityRepository::try_new(&tx)?;
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let sets = SqliteSetRepository::try_new(&tx)?;

            let organization_uuid =
                entities.upsert_organization(&submission.contributor.organization)?;
            let state_dict = entities.state_dict(&submission.states)?;
            let reference_dict = entities.reference_dict(&submission.references)?;

            let mut member_ids = Vec::with_capacity(submission.processes.len());
            for (process_index, process) in submission.processes.iter().enumerate() {
                let content = resolve_process_content(
                    &entities,
                    process,
                    process_index,
                    &state_dict,
                    &reference_dict,
                )?;
                let section = NewSection {
                    uuid: Uuid::new_v4(),
                    organization_uuid,
                    content,
                    status,
                    version: 1,
                    commit_message: commit_message.map(str::to_string),
                };
                sections.insert_section(&section)?;
                member_ids.push(section.uuid);
            }

            let set = NewSet {
                uuid: Uuid::new_v4(),
                name: submission.name.clone(),
                description: submission.description.clone(),
                complete: submission.complete,
                organization_uuid,
                status,
                version: 1,
                commit_message: commit_message.map(str::to_string),
            };
            sets.insert_set(&set)?;
            sets.replace_members(set.uuid, &member_ids)?;
            set.uuid
        };
        tx.commit()?;
        Ok(set_id)
    }

    /// Applies one submission to an existing set.
    ///
    /// Draft targets are updated in place; published targets fork a new
    /// draft version linked by a history edge. Per process, the reuse
    /// decision matches members by reaction identity and rewrites only what
    /// changed. A fully unchanged submission returns the target id without
    /// writing.
    pub fn update_set(
        &self,
        id: SetId,
        submission: &SetSubmission,
        commit_message: Option<&str>,
    ) -> Result<SetId, SetServiceError> {
        submission.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let result_id = {
            let entities = SqliteEntityRepository::try_new(&tx)?;
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let sets = SqliteSetRepository::try_new(&tx)?;

            let target = sets
                .get_set(id)?
                .ok_or(SetServiceError::SetNotFound(id))?;
            ensure_set_owner(&entities, &target, &submission.contributor)?;

            match target.version_info.status {
                VersionStatus::Draft => update_draft_set(
                    &entities,
                    &sections,
                    &sets,
                    &target,
                    submission,
                    commit_message,
                )?,
                VersionStatus::Published => fork_published_set(
                    &entities,
                    &sections,
                    &sets,
                    &target,
                    submission,
                    commit_message,
                )?,
                status @ (VersionStatus::Archived | VersionStatus::Retracted) => {
                    return Err(SetServiceError::InvalidStatus {
                        id,
                        status,
                        operation: "update",
                    });
                }
            }
        };
        tx.commit()?;
        Ok(result_id)
    }

    /// Publishes one draft set.
    ///
    /// The cascade is explicit and atomic: still-draft members are published
    /// first (archiving their published predecessors), the set flips to
    /// published, and the prior published set version becomes archived.
    pub fn publish_set(&self, id: SetId) -> Result<CrossSectionSetRecord, SetServiceError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let updated = {
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let sets = SqliteSetRepository::try_new(&tx)?;

            let target = sets
                .get_set(id)?
                .ok_or(SetServiceError::SetNotFound(id))?;
            if target.version_info.status != VersionStatus::Draft {
                return Err(SetServiceError::InvalidStatus {
                    id,
                    status: target.version_info.status,
                    operation: "publish",
                });
            }

            for member in sections.list_in_set(id)? {
                if member.version_info.status == VersionStatus::Draft {
                    publish_draft_section(&sections, &member)?;
                }
            }

            sets.set_status(id, VersionStatus::Published)?;

            if let Some(predecessor) = sets.direct_predecessor(id)? {
                let predecessor_record =
                    sets.get_set(predecessor)?
                        .ok_or(SetServiceError::InconsistentState(
                            "history edge points at missing set",
                        ))?;
                if predecessor_record.version_info.status == VersionStatus::Published {
                    sets.set_status(predecessor, VersionStatus::Archived)?;
                }
            }

            sets.get_set(id)?.ok_or(SetServiceError::InconsistentState(
                "published set not found in read-back",
            ))?
        };
        tx.commit()?;
        Ok(updated)
    }

    /// Deletes one set.
    ///
    /// Drafts are removed outright; member drafts left without any other
    /// set membership are discarded with them. Published sets become
    /// retracted and require a non-blank message. Shared nodes are never
    /// reclaimed.
    pub fn delete_set(&self, id: SetId, message: Option<&str>) -> Result<(), SetServiceError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        {
            let sections = SqliteSectionRepository::try_new(&tx)?;
            let sets = SqliteSetRepository::try_new(&tx)?;

            let target = sets
                .get_set(id)?
                .ok_or(SetServiceError::SetNotFound(id))?;

            match target.version_info.status {
                VersionStatus::Draft => {
                    let members = sections.list_in_set(id)?;
                    sets.delete_set(id)?;
                    for member in members {
                        if member.version_info.status == VersionStatus::Draft
                            && sets.membership_count(member.uuid)? == 0
                        {
                            sections.delete_section(member.uuid)?;
                        }
                    }
                }
                VersionStatus::Published => {
                    let message = message.map(str::trim).unwrap_or_default();
                    if message.is_empty() {
                        return Err(SetServiceError::RetractMessageRequired);
                    }
                    sets.set_retracted(id, message)?;
                }
                status @ (VersionStatus::Archived | VersionStatus::Retracted) => {
                    return Err(SetServiceError::InvalidStatus {
                        id,
                        status,
                        operation: "delete",
                    });
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Gets one set with its members, filtered by status allow-list.
    ///
    /// An empty `statuses` slice allows every status.
    pub fn get_set(
        &self,
        id: SetId,
        statuses: &[VersionStatus],
    ) -> Result<Option<SetDetail>, SetServiceError> {
        let sections = SqliteSectionRepository::try_new(self.conn)?;
        let sets = SqliteSetRepository::try_new(self.conn)?;

        let record = match sets.get_set(id)? {
            Some(record) if status_allowed(statuses, record.version_info.status) => record,
            _ => return Ok(None),
        };
        let members = sections.list_in_set(id)?;
        Ok(Some(SetDetail {
            set: record,
            members,
        }))
    }

    /// Gets one set regardless of status, for its owning organization only.
    pub fn get_owned_set(
        &self,
        contributor: &Contributor,
        id: SetId,
    ) -> Result<SetDetail, SetServiceError> {
        let entities = SqliteEntityRepository::try_new(self.conn)?;
        let sections = SqliteSectionRepository::try_new(self.conn)?;
        let sets = SqliteSetRepository::try_new(self.conn)?;

        let record = sets
            .get_set(id)?
            .ok_or(SetServiceError::SetNotFound(id))?;
        ensure_set_owner(&entities, &record, contributor)?;
        let members = sections.list_in_set(id)?;
        Ok(SetDetail {
            set: record,
            members,
        })
    }

    /// Lists set versions owned by one organization, newest first, filtered
    /// by status allow-list.
    ///
    /// An unknown organization yields an empty list. An empty `statuses`
    /// slice allows every status.
    pub fn list_organization_sets(
        &self,
        organization: &str,
        statuses: &[VersionStatus],
    ) -> Result<Vec<CrossSectionSetRecord>, SetServiceError> {
        let entities = SqliteEntityRepository::try_new(self.conn)?;
        let sets = SqliteSetRepository::try_new(self.conn)?;

        let Some(organization_uuid) = entities.find_organization(organization)? else {
            return Ok(Vec::new());
        };

        let mut records = sets.list_by_organization(organization_uuid)?;
        records.retain(|record| status_allowed(statuses, record.version_info.status));
        Ok(records)
    }

    /// Returns the full version history of one set, newest first.
    pub fn set_history(&self, id: SetId) -> Result<Vec<VersionSummary>, SetServiceError> {
        Ok(history_of(self.conn, LineageKind::Set, id)?)
    }

    /// Returns the nearest non-archived set version reachable from this one.
    pub fn active_set_version(
        &self,
        id: SetId,
    ) -> Result<Option<VersionSummary>, SetServiceError> {
        Ok(active_successor_of(self.conn, LineageKind::Set, id)?)
    }
}

/// Applies one submission to a draft set in place.
fn update_draft_set(
    entities: &SqliteEntityRepository<'_>,
    sections: &SqliteSectionRepository<'_>,
    sets: &SqliteSetRepository<'_>,
    target: &CrossSectionSetRecord,
    submission: &SetSubmission,
    commit_message: Option<&str>,
) -> Result<SetId, SetServiceError> {
    let auto_message = indirect_draft_message(&submission.name, target.uuid);
    let reconciled = reconcile_members(
        entities,
        sections,
        target,
        submission,
        VersionStatus::Draft,
        &auto_message,
    )?;

    let header_changed = target.name != submission.name
        || target.description != submission.description
        || target.complete != submission.complete;

    if !header_changed && !reconciled.members_changed {
        return Ok(target.uuid);
    }

    sets.update_draft_header(
        target.uuid,
        &submission.name,
        &submission.description,
        submission.complete,
        commit_message,
    )?;
    sets.replace_members(target.uuid, &reconciled.member_ids)?;

    for dropped in &reconciled.dropped_members {
        if dropped.version_info.status == VersionStatus::Draft
            && sets.membership_count(dropped.uuid)? == 0
        {
            sections.delete_section(dropped.uuid)?;
        }
    }

    Ok(target.uuid)
}

/// Applies one submission to a published set by forking a draft version.
fn fork_published_set(
    entities: &SqliteEntityRepository<'_>,
    sections: &SqliteSectionRepository<'_>,
    sets: &SqliteSetRepository<'_>,
    target: &CrossSectionSetRecord,
    submission: &SetSubmission,
    commit_message: Option<&str>,
) -> Result<SetId, SetServiceError> {
    if let Some(draft) = sets.direct_successor(target.uuid)? {
        return Err(SetServiceError::DraftAlreadyExists {
            published: target.uuid,
            draft,
        });
    }

    let new_set_id = Uuid::new_v4();
    let auto_message = indirect_draft_message(&submission.name, new_set_id);
    let reconciled = reconcile_members(
        entities,
        sections,
        target,
        submission,
        VersionStatus::Draft,
        &auto_message,
    )?;

    let header_changed = target.name != submission.name
        || target.description != submission.description
        || target.complete != submission.complete;

    if !header_changed && !reconciled.members_changed {
        return Ok(target.uuid);
    }

    let set = NewSet {
        uuid: new_set_id,
        name: submission.name.clone(),
        description: submission.description.clone(),
        complete: submission.complete,
        organization_uuid: target.organization_uuid,
        status: VersionStatus::Draft,
        version: target.version_info.version + 1,
        commit_message: commit_message.map(str::to_string),
    };
    sets.insert_set(&set)?;
    sets.replace_members(new_set_id, &reconciled.member_ids)?;
    sets.insert_history_edge(new_set_id, target.uuid)?;

    Ok(new_set_id)
}

/// Outcome of matching submission processes against current set members.
struct ReconciledMembers {
    /// Member ids for the resulting set version, in process order.
    member_ids: Vec<SectionId>,
    /// Current members no submission process matched.
    dropped_members: Vec<CrossSectionRecord>,
    /// Whether any member was rewritten, added or dropped.
    members_changed: bool,
}

/// Runs the per-process reuse decision for one submission.
///
/// Processes match current members by reaction identity, first unmatched
/// slot wins. Matched members go through the cross-section update rules;
/// unmatched processes become fresh version-1 documents in `new_status`.
fn reconcile_members(
    entities: &SqliteEntityRepository<'_>,
    sections: &SqliteSectionRepository<'_>,
    target: &CrossSectionSetRecord,
    submission: &SetSubmission,
    new_status: VersionStatus,
    auto_message: &str,
) -> Result<ReconciledMembers, SetServiceError> {
    let state_dict = entities.state_dict(&submission.states)?;
    let reference_dict = entities.reference_dict(&submission.references)?;

    let current_members = sections.list_in_set(target.uuid)?;
    let mut matched = vec![false; current_members.len()];
    let mut member_ids = Vec::with_capacity(submission.processes.len());
    let mut members_changed = false;

    for (process_index, process) in submission.processes.iter().enumerate() {
        let content = resolve_process_content(
            entities,
            process,
            process_index,
            &state_dict,
            &reference_dict,
        )?;

        let slot = current_members.iter().enumerate().find(|(slot_index, member)| {
            !matched[*slot_index] && member.content.reaction_uuid == content.reaction_uuid
        });

        match slot {
            Some((slot_index, member)) => {
                matched[slot_index] = true;
                let outcome = apply_section_update(sections, member, &content, Some(auto_message))?;
                if !matches!(outcome, SectionUpdateOutcome::Unchanged(_)) {
                    members_changed = true;
                }
                member_ids.push(outcome.section_id());
            }
            None => {
                members_changed = true;
                let section = NewSection {
                    uuid: Uuid::new_v4(),
                    organization_uuid: target.organization_uuid,
                    content,
                    status: new_status,
                    version: 1,
                    commit_message: Some(auto_message.to_string()),
                };
                sections.insert_section(&section)?;
                member_ids.push(section.uuid);
            }
        }
    }

    let dropped_members: Vec<CrossSectionRecord> = current_members
        .into_iter()
        .zip(matched)
        .filter(|(_, was_matched)| !*was_matched)
        .map(|(member, _)| member)
        .collect();
    if !dropped_members.is_empty() {
        members_changed = true;
    }

    Ok(ReconciledMembers {
        member_ids,
        dropped_members,
        members_changed,
    })
}

/// Resolves one process submission into storable content with node ids.
fn resolve_process_content(
    entities: &SqliteEntityRepository<'_>,
    process: &ProcessSubmission,
    process_index: usize,
    state_dict: &BTreeMap<String, StateId>,
    reference_dict: &BTreeMap<String, ReferenceId>,
) -> Result<SectionContent, SetServiceError> {
    let resolved = resolve_reaction(&process.reaction, state_dict)
        .map_err(|error| map_resolve_error(process_index, error))?;
    let reaction_uuid = entities.upsert_reaction(&resolved)?;

    let mut references = Vec::with_capacity(process.references.len());
    for label in &process.references {
        let id = reference_dict.get(label).copied().ok_or_else(|| {
            SetServiceError::Validation(SubmissionError::UnknownReferenceLabel {
                process_index,
                label: label.clone(),
            })
        })?;
        references.push(id);
    }

    Ok(SectionContent {
        reaction_uuid,
        data: process.data.clone(),
        threshold: process.threshold,
        parameters: process.parameters.clone(),
        references,
    })
}

fn map_resolve_error(process_index: usize, error: ReactionResolveError) -> SetServiceError {
    match error {
        ReactionResolveError::UnknownStateLabel(label) => {
            SetServiceError::Validation(SubmissionError::UnknownStateLabel {
                process_index,
                label,
            })
        }
    }
}

fn indirect_draft_message(set_name: &str, set_id: SetId) -> String {
    format!("Indirect draft by editing set `{set_name}` / `{set_id}`")
}

fn ensure_set_owner(
    entities: &SqliteEntityRepository<'_>,
    target: &CrossSectionSetRecord,
    contributor: &Contributor,
) -> Result<(), SetServiceError> {
    let acting = entities.find_organization(&contributor.organization)?;
    if acting != Some(target.organization_uuid) {
        return Err(SetServiceError::OrganizationMismatch {
            id: target.uuid,
            organization: contributor.organization.clone(),
        });
    }
    Ok(())
}

fn status_allowed(statuses: &[VersionStatus], status: VersionStatus) -> bool {
    statuses.is_empty() || statuses.contains(&status)
}
