//! Version lifecycle model shared by cross sections and their sets.
//!
//! # Responsibility
//! - Define the version status state space and its storage text mapping.
//! - Define read models for version metadata and lineage summaries.
//!
//! # Invariants
//! - `version` starts at 1 and grows by exactly 1 along a lineage.
//! - `created_on` is epoch milliseconds assigned by storage.
//! - Published and archived versions are immutable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for one stored cross-section version.
pub type SectionId = Uuid;

/// Stable identifier for one stored cross-section set version.
pub type SetId = Uuid;

/// Lifecycle status of one stored document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Editable, visible only to the owning organization.
    Draft,
    /// Immutable and publicly readable.
    Published,
    /// Superseded by a newer published version in the same lineage.
    Archived,
    /// Withdrawn from active use with a mandatory retract message.
    Retracted,
}

impl VersionStatus {
    /// Returns the storage text for this status.
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
            Self::Retracted => "retracted",
        }
    }

    /// Parses storage text back into a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            "retracted" => Some(Self::Retracted),
            _ => None,
        }
    }
}

/// Version metadata carried by every stored document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub status: VersionStatus,
    /// Position in the lineage, starting at 1.
    pub version: u32,
    /// Creation timestamp in epoch milliseconds.
    pub created_on: i64,
    /// Author-supplied description of what changed in this version.
    pub commit_message: Option<String>,
    /// Mandatory explanation recorded when a published version is retracted.
    pub retract_message: Option<String>,
}

/// Flat lineage entry returned by history and successor lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: Uuid,
    pub status: VersionStatus,
    pub version: u32,
    pub created_on: i64,
    pub commit_message: Option<String>,
    pub retract_message: Option<String>,
}
