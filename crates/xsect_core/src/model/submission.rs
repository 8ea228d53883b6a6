//! Submission document model and structural validation.
//!
//! # Responsibility
//! - Define the external document shape for cross-section set submissions.
//! - Validate document structure before any storage work starts.
//!
//! # Invariants
//! - Every state/reference label used by a process resolves inside the
//!   document itself.
//! - Data payloads are stored and returned without reinterpretation.

use crate::model::reaction::ReactionInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Acting identity attached to a submission.
///
/// Both fields arrive pre-validated from the hosting application; core only
/// uses the organization name for ownership decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub email: String,
    pub organization: String,
}

/// Tabulated cross-section data payload.
///
/// Stored verbatim; core never reinterprets the numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionData {
    LookupTable {
        labels: [String; 2],
        units: [String; 2],
        values: Vec<[f64; 2]>,
    },
}

/// Optional physical parameters attached to one cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistical_weight_ratio: Option<f64>,
}

/// One process (cross section) inside a set submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSubmission {
    pub reaction: ReactionInput,
    /// Threshold energy in eV. Must be finite and non-negative.
    #[serde(default)]
    pub threshold: f64,
    pub data: SectionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<SectionParameters>,
    /// Labels into the document reference map, in citation order.
    #[serde(default)]
    pub references: Vec<String>,
}

/// Complete cross-section set submission document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSubmission {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub complete: bool,
    pub contributor: Contributor,
    /// Document-local state label -> opaque state payload.
    #[serde(default)]
    pub states: BTreeMap<String, Value>,
    /// Document-local reference label -> opaque reference payload.
    #[serde(default)]
    pub references: BTreeMap<String, Value>,
    #[serde(default)]
    pub processes: Vec<ProcessSubmission>,
}

impl SetSubmission {
    /// Validates document structure before any storage interaction.
    ///
    /// # Invariants checked
    /// - `name`, contributor email and organization are non-blank.
    /// - Every reaction has at least one entry and references known state
    ///   labels with counts >= 1.
    /// - Every citation references a known reference label.
    /// - Thresholds are finite and non-negative.
    /// - Lookup tables carry at least one row.
    /// - Parameters, when present, are finite and positive.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.name.trim().is_empty() {
            return Err(SubmissionError::BlankName);
        }
        if self.contributor.email.trim().is_empty()
            || self.contributor.organization.trim().is_empty()
        {
            return Err(SubmissionError::BlankContributor);
        }

        for (index, process) in self.processes.iter().enumerate() {
            if process.reaction.lhs.is_empty() && process.reaction.rhs.is_empty() {
                return Err(SubmissionError::EmptyReaction {
                    process_index: index,
                });
            }

            for entry in process
                .reaction
                .lhs
                .iter()
                .chain(process.reaction.rhs.iter())
            {
                if entry.count == 0 {
                    return Err(SubmissionError::ZeroEntryCount {
                        process_index: index,
                        label: entry.state.clone(),
                    });
                }
                if !self.states.contains_key(&entry.state) {
                    return Err(SubmissionError::UnknownStateLabel {
                        process_index: index,
                        label: entry.state.clone(),
                    });
                }
            }

            if !process.threshold.is_finite() || process.threshold < 0.0 {
                return Err(SubmissionError::InvalidThreshold {
                    process_index: index,
                    value: process.threshold,
                });
            }

            let SectionData::LookupTable { values, .. } = &process.data;
            if values.is_empty() {
                return Err(SubmissionError::EmptyDataTable {
                    process_index: index,
                });
            }

            for label in &process.references {
                if !self.references.contains_key(label) {
                    return Err(SubmissionError::UnknownReferenceLabel {
                        process_index: index,
                        label: label.clone(),
                    });
                }
            }

            if let Some(parameters) = &process.parameters {
                for (field, value) in [
                    ("mass_ratio", parameters.mass_ratio),
                    ("statistical_weight_ratio", parameters.statistical_weight_ratio),
                ] {
                    if let Some(value) = value {
                        if !value.is_finite() || value <= 0.0 {
                            return Err(SubmissionError::InvalidParameter {
                                process_index: index,
                                field,
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Structural validation error for submission documents.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionError {
    BlankName,
    BlankContributor,
    EmptyReaction {
        process_index: usize,
    },
    ZeroEntryCount {
        process_index: usize,
        label: String,
    },
    UnknownStateLabel {
        process_index: usize,
        label: String,
    },
    UnknownReferenceLabel {
        process_index: usize,
        label: String,
    },
    InvalidThreshold {
        process_index: usize,
        value: f64,
    },
    EmptyDataTable {
        process_index: usize,
    },
    InvalidParameter {
        process_index: usize,
        field: &'static str,
    },
}

impl Display for SubmissionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "set name cannot be blank"),
            Self::BlankContributor => {
                write!(f, "contributor email and organization cannot be blank")
            }
            Self::EmptyReaction { process_index } => write!(
                f,
                "process {process_index}: reaction has no entries on either side"
            ),
            Self::ZeroEntryCount {
                process_index,
                label,
            } => write!(
                f,
                "process {process_index}: entry count for state `{label}` must be at least 1"
            ),
            Self::UnknownStateLabel {
                process_index,
                label,
            } => write!(f, "process {process_index}: unknown state label `{label}`"),
            Self::UnknownReferenceLabel {
                process_index,
                label,
            } => write!(
                f,
                "process {process_index}: unknown reference label `{label}`"
            ),
            Self::InvalidThreshold {
                process_index,
                value,
            } => write!(
                f,
                "process {process_index}: threshold {value} must be finite and non-negative"
            ),
            Self::EmptyDataTable { process_index } => {
                write!(f, "process {process_index}: lookup table has no rows")
            }
            Self::InvalidParameter {
                process_index,
                field,
            } => write!(
                f,
                "process {process_index}: parameter `{field}` must be finite and positive"
            ),
        }
    }
}

impl Error for SubmissionError {}
