//! Core engine for versioned cross-section data curation.
//! This crate is the single source of truth for business invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::reaction::{
    resolve_reaction, ReactionEntry, ReactionId, ReactionInput, ReactionResolveError,
    ResolvedReaction,
};
pub use model::submission::{
    Contributor, ProcessSubmission, SectionData, SectionParameters, SetSubmission, SubmissionError,
};
pub use model::version::{SectionId, SetId, VersionInfo, VersionStatus, VersionSummary};
pub use model::{OrganizationId, ReferenceId, StateId};
pub use repo::entity_repo::{
    EntityRepoError, EntityRepoResult, EntityRepository, SqliteEntityRepository,
};
pub use repo::lineage_repo::{
    active_successor_of, history_of, LineageError, LineageKind, LineageResult,
};
pub use repo::section_repo::{
    CrossSectionRecord, NewSection, SectionContent, SectionRepoError, SectionRepoResult,
    SectionRepository, SqliteSectionRepository,
};
pub use repo::set_repo::{
    CrossSectionSetRecord, NewSet, SetRepoError, SetRepoResult, SetRepository,
    SqliteSetRepository,
};
pub use search::fts::{search_sets, SearchError, SearchResult, SetSearchHit, SetSearchQuery};
pub use service::section_service::{SectionService, SectionServiceError};
pub use service::set_service::{SetDetail, SetService, SetServiceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
