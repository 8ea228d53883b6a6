use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;
use xsect_core::db::open_db_in_memory;
use xsect_core::{
    active_successor_of, history_of, Contributor, CrossSectionRecord, LineageError, LineageKind,
    ProcessSubmission, ReactionEntry, ReactionInput, SectionData, SectionService, SetId,
    SetService, SetServiceError, SetSubmission, VersionStatus,
};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn contributor() -> Contributor {
    Contributor {
        email: "curator@cnrs.example".to_string(),
        organization: "CNRS Plasma".to_string(),
    }
}

#[test]
fn set_history_walks_lineage_newest_first() {
    let conn = setup();
    let chain = publish_chain(&conn, &[0.0, 1.0, 2.0]);
    let service = SetService::new(&conn);

    let history = service.set_history(chain[2]).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, chain[2]);
    assert_eq!(history[1].id, chain[1]);
    assert_eq!(history[2].id, chain[0]);
    assert_eq!(history[0].version, 3);
    assert_eq!(history[1].version, 2);
    assert_eq!(history[2].version, 1);
    assert_eq!(history[0].status, VersionStatus::Published);
    assert_eq!(history[1].status, VersionStatus::Archived);
    assert_eq!(history[2].status, VersionStatus::Archived);

    let partial = service.set_history(chain[1]).unwrap();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial[0].id, chain[1]);
    assert_eq!(partial[1].id, chain[0]);
}

#[test]
fn active_successor_resolves_across_archived_versions() {
    let conn = setup();
    let chain = publish_chain(&conn, &[0.0, 1.0, 2.0]);
    let service = SetService::new(&conn);

    let from_oldest = service.active_set_version(chain[0]).unwrap().unwrap();
    assert_eq!(from_oldest.id, chain[2]);
    assert_eq!(from_oldest.status, VersionStatus::Published);

    let from_newest = service.active_set_version(chain[2]).unwrap().unwrap();
    assert_eq!(from_newest.id, chain[2]);
}

#[test]
fn newly_created_set_is_its_own_history_and_active_version() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(&submission(0.0), VersionStatus::Draft, None)
        .unwrap();

    let history = service.set_history(set_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, set_id);
    assert_eq!(history[0].version, 1);

    let active = service.active_set_version(set_id).unwrap().unwrap();
    assert_eq!(active.id, set_id);
    assert_eq!(active.status, VersionStatus::Draft);
}

#[test]
fn retracted_version_is_still_an_active_successor() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(&submission(0.0), VersionStatus::Published, None)
        .unwrap();
    service
        .delete_set(set_id, Some("withdrawn after review"))
        .unwrap();

    let active = service.active_set_version(set_id).unwrap().unwrap();
    assert_eq!(active.id, set_id);
    assert_eq!(active.status, VersionStatus::Retracted);
    assert_eq!(
        active.retract_message.as_deref(),
        Some("withdrawn after review")
    );
}

#[test]
fn unknown_ids_return_not_found() {
    let conn = setup();
    let unknown = Uuid::new_v4();

    let history_err = history_of(&conn, LineageKind::Section, unknown).unwrap_err();
    assert!(matches!(history_err, LineageError::NotFound(id) if id == unknown));

    let active_err = active_successor_of(&conn, LineageKind::Set, unknown).unwrap_err();
    assert!(matches!(active_err, LineageError::NotFound(id) if id == unknown));

    let service_err = SetService::new(&conn).set_history(unknown).unwrap_err();
    assert!(matches!(service_err, SetServiceError::SetNotFound(id) if id == unknown));
}

#[test]
fn section_lineage_tracks_member_forks() {
    let conn = setup();
    let set_service = SetService::new(&conn);
    let v1 = set_service
        .create_set(&submission(0.0), VersionStatus::Published, None)
        .unwrap();
    let old_member = sole_member(&conn, v1);

    let v2 = set_service
        .update_set(v1, &submission(1.0), None)
        .unwrap();
    set_service.publish_set(v2).unwrap();
    let new_member = sole_member(&conn, v2);
    assert_ne!(new_member.uuid, old_member.uuid);

    let section_service = SectionService::new(&conn);
    let history = section_service.section_history(new_member.uuid).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, new_member.uuid);
    assert_eq!(history[1].id, old_member.uuid);
    assert_eq!(history[1].status, VersionStatus::Archived);

    let active = section_service
        .active_section_version(old_member.uuid)
        .unwrap()
        .unwrap();
    assert_eq!(active.id, new_member.uuid);
    assert_eq!(active.status, VersionStatus::Published);
}

fn submission(threshold: f64) -> SetSubmission {
    let mut states = BTreeMap::new();
    states.insert("e".to_string(), json!({ "particle": "e", "charge": -1 }));
    states.insert("Ar".to_string(), json!({ "particle": "Ar", "charge": 0 }));

    let mut references = BTreeMap::new();
    references.insert(
        "hayashi1981".to_string(),
        json!({ "type": "article", "year": 1981 }),
    );

    SetSubmission {
        name: "Argon elastic collection".to_string(),
        description: "Momentum transfer data".to_string(),
        complete: false,
        contributor: contributor(),
        states,
        references,
        processes: vec![ProcessSubmission {
            reaction: ReactionInput {
                lhs: vec![entry(1, "e"), entry(1, "Ar")],
                rhs: vec![entry(1, "e"), entry(1, "Ar")],
                reversible: false,
                type_tags: vec!["elastic".to_string()],
            },
            threshold,
            data: SectionData::LookupTable {
                labels: ["Energy".to_string(), "Cross section".to_string()],
                units: ["eV".to_string(), "m^2".to_string()],
                values: vec![[0.0, 6.0e-20], [10.0, 1.2e-20]],
            },
            parameters: None,
            references: vec!["hayashi1981".to_string()],
        }],
    }
}

fn entry(count: u32, state: &str) -> ReactionEntry {
    ReactionEntry {
        count,
        state: state.to_string(),
    }
}

fn publish_chain(conn: &Connection, thresholds: &[f64]) -> Vec<SetId> {
    let service = SetService::new(conn);
    let mut ids = Vec::new();

    let first = service
        .create_set(&submission(thresholds[0]), VersionStatus::Published, None)
        .unwrap();
    ids.push(first);

    for threshold in &thresholds[1..] {
        let previous = *ids.last().unwrap();
        let next = service
            .update_set(previous, &submission(*threshold), None)
            .unwrap();
        service.publish_set(next).unwrap();
        ids.push(next);
    }

    ids
}

fn sole_member(conn: &Connection, set_id: SetId) -> CrossSectionRecord {
    let detail = SetService::new(conn).get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.members.len(), 1);
    detail.members.into_iter().next().unwrap()
}
