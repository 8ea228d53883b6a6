//! Reaction assembly and content identity.
//!
//! # Responsibility
//! - Resolve submission-local state labels to global state node ids.
//! - Derive the content identity used to deduplicate reaction nodes.
//!
//! # Invariants
//! - Entry order is part of reaction identity on both sides.
//! - Resolution performs no storage access and never mutates its inputs.

use crate::model::canon::canonical_digest;
use crate::model::StateId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for reaction nodes.
pub type ReactionId = Uuid;

/// One species entry on a reaction side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    /// Stoichiometric count. Must be >= 1.
    pub count: u32,
    /// Submission-local state label, resolved against the document state map.
    pub state: String,
}

/// Reaction as written in a submission document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionInput {
    pub lhs: Vec<ReactionEntry>,
    pub rhs: Vec<ReactionEntry>,
    #[serde(default)]
    pub reversible: bool,
    #[serde(default)]
    pub type_tags: Vec<String>,
}

/// Reaction with state labels replaced by global state node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReaction {
    pub lhs: Vec<(u32, StateId)>,
    pub rhs: Vec<(u32, StateId)>,
    pub reversible: bool,
    pub type_tags: Vec<String>,
}

impl ResolvedReaction {
    /// Returns the content identity digest for this reaction.
    ///
    /// Two resolved reactions share a digest exactly when both sides match
    /// entry for entry in the same order, with equal `reversible` and
    /// `type_tags`. Reordering entries yields a different identity even when
    /// the multiset of species is unchanged.
    pub fn identity(&self) -> Result<String, serde_json::Error> {
        canonical_digest(self)
    }
}

/// Error from resolving submission labels to state node ids.
#[derive(Debug)]
pub enum ReactionResolveError {
    /// Reaction references a state label missing from the document state map.
    UnknownStateLabel(String),
}

impl Display for ReactionResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownStateLabel(label) => {
                write!(f, "unknown state label `{label}` in reaction")
            }
        }
    }
}

impl Error for ReactionResolveError {}

/// Replaces the state labels of `input` with global ids from `states`.
pub fn resolve_reaction(
    input: &ReactionInput,
    states: &BTreeMap<String, StateId>,
) -> Result<ResolvedReaction, ReactionResolveError> {
    Ok(ResolvedReaction {
        lhs: resolve_side(&input.lhs, states)?,
        rhs: resolve_side(&input.rhs, states)?,
        reversible: input.reversible,
        type_tags: input.type_tags.clone(),
    })
}

fn resolve_side(
    entries: &[ReactionEntry],
    states: &BTreeMap<String, StateId>,
) -> Result<Vec<(u32, StateId)>, ReactionResolveError> {
    entries
        .iter()
        .map(|entry| {
            let id = states
                .get(&entry.state)
                .copied()
                .ok_or_else(|| ReactionResolveError::UnknownStateLabel(entry.state.clone()))?;
            Ok((entry.count, id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{resolve_reaction, ReactionEntry, ReactionInput, ReactionResolveError};
    use crate::model::StateId;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn state_map(labels: &[&str]) -> BTreeMap<String, StateId> {
        labels
            .iter()
            .map(|label| ((*label).to_string(), Uuid::new_v4()))
            .collect()
    }

    fn entry(count: u32, state: &str) -> ReactionEntry {
        ReactionEntry {
            count,
            state: state.to_string(),
        }
    }

    #[test]
    fn resolve_maps_labels_to_state_ids() {
        let states = state_map(&["e", "Ar"]);
        let input = ReactionInput {
            lhs: vec![entry(1, "e"), entry(1, "Ar")],
            rhs: vec![entry(2, "e")],
            reversible: false,
            type_tags: vec!["ionization".to_string()],
        };

        let resolved = resolve_reaction(&input, &states).unwrap();
        assert_eq!(resolved.lhs[0], (1, states["e"]));
        assert_eq!(resolved.lhs[1], (1, states["Ar"]));
        assert_eq!(resolved.rhs[0], (2, states["e"]));
        assert!(!resolved.reversible);
    }

    #[test]
    fn resolve_rejects_unknown_label() {
        let states = state_map(&["e"]);
        let input = ReactionInput {
            lhs: vec![entry(1, "He")],
            rhs: vec![],
            reversible: false,
            type_tags: vec![],
        };

        let err = resolve_reaction(&input, &states).unwrap_err();
        assert!(matches!(err, ReactionResolveError::UnknownStateLabel(label) if label == "He"));
    }

    #[test]
    fn identity_is_stable_for_equal_content() {
        let states = state_map(&["e", "Ar"]);
        let input = ReactionInput {
            lhs: vec![entry(1, "e"), entry(1, "Ar")],
            rhs: vec![entry(1, "e"), entry(1, "Ar")],
            reversible: true,
            type_tags: vec!["elastic".to_string()],
        };

        let first = resolve_reaction(&input, &states).unwrap();
        let second = resolve_reaction(&input, &states).unwrap();
        assert_eq!(first.identity().unwrap(), second.identity().unwrap());
    }

    #[test]
    fn identity_is_sensitive_to_entry_order() {
        let states = state_map(&["e", "Ar"]);
        let forward = ReactionInput {
            lhs: vec![entry(1, "e"), entry(1, "Ar")],
            rhs: vec![entry(1, "e"), entry(1, "Ar")],
            reversible: false,
            type_tags: vec![],
        };
        let swapped = ReactionInput {
            lhs: vec![entry(1, "Ar"), entry(1, "e")],
            rhs: vec![entry(1, "e"), entry(1, "Ar")],
            reversible: false,
            type_tags: vec![],
        };

        let forward_id = resolve_reaction(&forward, &states).unwrap().identity().unwrap();
        let swapped_id = resolve_reaction(&swapped, &states).unwrap().identity().unwrap();
        assert_ne!(forward_id, swapped_id);
    }
}
