use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;
use xsect_core::db::open_db_in_memory;
use xsect_core::{
    Contributor, CrossSectionRecord, ProcessSubmission, ReactionEntry, ReactionInput, SectionData,
    SetDetail, SetId, SetService, SetServiceError, SetSubmission, SubmissionError, VersionStatus,
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

fn foreign_contributor() -> Contributor {
    Contributor {
        email: "guest@rival.example".to_string(),
        organization: "Rival Institute".to_string(),
    }
}

#[test]
fn create_draft_set_creates_draft_members_at_version_one() {
    let conn = setup();
    let service = SetService::new(&conn);

    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Draft,
            Some("initial import"),
        )
        .unwrap();

    let detail = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.set.name, "Argon collisions");
    assert_eq!(detail.set.version_info.status, VersionStatus::Draft);
    assert_eq!(detail.set.version_info.version, 1);
    assert_eq!(
        detail.set.version_info.commit_message.as_deref(),
        Some("initial import")
    );

    assert_eq!(detail.members.len(), 2);
    for member in &detail.members {
        assert_eq!(member.version_info.status, VersionStatus::Draft);
        assert_eq!(member.version_info.version, 1);
        assert_eq!(
            member.version_info.commit_message.as_deref(),
            Some("initial import")
        );
    }
}

#[test]
fn create_published_set_is_immediately_public() {
    let conn = setup();
    let service = SetService::new(&conn);

    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let detail = service
        .get_set(set_id, &[VersionStatus::Published])
        .unwrap()
        .unwrap();
    assert_eq!(detail.set.version_info.status, VersionStatus::Published);
    assert_eq!(detail.members.len(), 1);
    assert_eq!(
        detail.members[0].version_info.status,
        VersionStatus::Published
    );
}

#[test]
fn create_rejects_non_initial_status() {
    let conn = setup();
    let service = SetService::new(&conn);

    let err = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0)]),
            VersionStatus::Archived,
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::UnsupportedInitialStatus(VersionStatus::Archived)
    ));
}

#[test]
fn create_rejects_structurally_invalid_submission() {
    let conn = setup();
    let service = SetService::new(&conn);

    let mut invalid = submission("Argon collisions", vec![elastic_process(0.0)]);
    invalid.name = "  ".to_string();

    let err = service
        .create_set(&invalid, VersionStatus::Draft, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::Validation(SubmissionError::BlankName)
    ));
}

#[test]
fn update_draft_set_edits_header_in_place() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Working title", vec![elastic_process(0.0)]),
            VersionStatus::Draft,
            Some("initial import"),
        )
        .unwrap();
    let member_before = sole_member(&conn, set_id);

    let mut renamed = submission("Argon elastic, reviewed", vec![elastic_process(0.0)]);
    renamed.description = "Reviewed against swarm benchmarks".to_string();
    renamed.complete = true;

    let updated_id = service
        .update_set(set_id, &renamed, Some("review pass"))
        .unwrap();
    assert_eq!(updated_id, set_id);

    let detail = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.set.name, "Argon elastic, reviewed");
    assert_eq!(detail.set.description, "Reviewed against swarm benchmarks");
    assert!(detail.set.complete);
    assert_eq!(detail.set.version_info.version, 1);
    assert_eq!(
        detail.set.version_info.commit_message.as_deref(),
        Some("review pass")
    );

    assert_eq!(detail.members.len(), 1);
    assert_eq!(detail.members[0].uuid, member_before.uuid);
    assert_eq!(
        detail.members[0].version_info.commit_message.as_deref(),
        Some("initial import")
    );
}

#[test]
fn update_draft_set_rewrites_changed_member_in_place() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();
    let member_before = sole_member(&conn, set_id);

    let updated_id = service
        .update_set(
            set_id,
            &submission("Argon elastic", vec![elastic_process(2.0)]),
            None,
        )
        .unwrap();
    assert_eq!(updated_id, set_id);

    let member_after = sole_member(&conn, set_id);
    assert_eq!(member_after.uuid, member_before.uuid);
    assert_eq!(member_after.version_info.version, 1);
    assert_eq!(member_after.content.threshold, 2.0);
    assert!(member_after
        .version_info
        .commit_message
        .as_deref()
        .unwrap_or("")
        .contains("Indirect draft by editing set"));
}

#[test]
fn update_draft_set_discards_dropped_exclusive_members() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();
    assert_eq!(row_count(&conn, "cross_sections"), 2);

    service
        .update_set(
            set_id,
            &submission("Argon collisions", vec![elastic_process(0.0)]),
            Some("drop ionization"),
        )
        .unwrap();

    let detail = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.members.len(), 1);
    assert_eq!(detail.members[0].content.threshold, 0.0);
    assert_eq!(row_count(&conn, "cross_sections"), 1);
}

#[test]
fn fully_unchanged_update_is_a_noop() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let result_id = service
        .update_set(
            set_id,
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            Some("no actual change"),
        )
        .unwrap();
    assert_eq!(result_id, set_id);

    let history = service.set_history(set_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, VersionStatus::Published);
    assert_eq!(row_count(&conn, "cross_section_sets"), 1);
}

#[test]
fn update_published_set_forks_new_draft_version() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();
    let old_detail = service.get_set(set_id, &[]).unwrap().unwrap();
    let old_elastic = member_with_threshold(&old_detail, 0.0);
    let old_ionization = member_with_threshold(&old_detail, 15.76);

    let forked_id = service
        .update_set(
            set_id,
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(16.0)]),
            Some("re-fitted ionization threshold"),
        )
        .unwrap();
    assert_ne!(forked_id, set_id);

    let forked = service.get_set(forked_id, &[]).unwrap().unwrap();
    assert_eq!(forked.set.version_info.status, VersionStatus::Draft);
    assert_eq!(forked.set.version_info.version, 2);
    assert_eq!(
        forked.set.version_info.commit_message.as_deref(),
        Some("re-fitted ionization threshold")
    );

    assert_eq!(forked.members.len(), 2);
    let reused_elastic = member_with_threshold(&forked, 0.0);
    assert_eq!(reused_elastic.uuid, old_elastic.uuid);
    assert_eq!(
        reused_elastic.version_info.status,
        VersionStatus::Published
    );

    let new_ionization = member_with_threshold(&forked, 16.0);
    assert_ne!(new_ionization.uuid, old_ionization.uuid);
    assert_eq!(new_ionization.version_info.status, VersionStatus::Draft);
    assert_eq!(new_ionization.version_info.version, 2);
    assert!(new_ionization
        .version_info
        .commit_message
        .as_deref()
        .unwrap_or("")
        .contains("Indirect draft by editing set"));

    let old_after = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(old_after.set.version_info.status, VersionStatus::Published);
    assert_eq!(old_after.members.len(), 2);
    assert_eq!(
        member_with_threshold(&old_after, 15.76).uuid,
        old_ionization.uuid
    );

    let history = service.set_history(forked_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, forked_id);
    assert_eq!(history[1].id, set_id);
}

#[test]
fn update_published_set_is_blocked_by_existing_draft_successor() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();
    let forked_id = service
        .update_set(
            set_id,
            &submission("Argon elastic", vec![elastic_process(1.0)]),
            None,
        )
        .unwrap();

    let err = service
        .update_set(
            set_id,
            &submission("Argon elastic", vec![elastic_process(2.0)]),
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::DraftAlreadyExists { published, draft }
            if published == set_id && draft == forked_id
    ));
}

#[test]
fn publish_set_cascades_to_members_and_archives_predecessor() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();
    let old_detail = service.get_set(set_id, &[]).unwrap().unwrap();
    let old_ionization = member_with_threshold(&old_detail, 15.76);

    let forked_id = service
        .update_set(
            set_id,
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(16.0)]),
            Some("re-fitted ionization threshold"),
        )
        .unwrap();

    let published = service.publish_set(forked_id).unwrap();
    assert_eq!(published.version_info.status, VersionStatus::Published);

    let forked = service.get_set(forked_id, &[]).unwrap().unwrap();
    let new_ionization = member_with_threshold(&forked, 16.0);
    assert_eq!(
        new_ionization.version_info.status,
        VersionStatus::Published
    );
    assert_eq!(
        member_with_threshold(&forked, 0.0).version_info.status,
        VersionStatus::Published
    );

    let old_after = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(old_after.set.version_info.status, VersionStatus::Archived);
    assert_eq!(
        member_with_threshold(&old_after, 15.76).uuid,
        old_ionization.uuid
    );
    assert_eq!(
        member_with_threshold(&old_after, 15.76).version_info.status,
        VersionStatus::Archived
    );

    let active = service.active_set_version(set_id).unwrap().unwrap();
    assert_eq!(active.id, forked_id);
    assert_eq!(active.status, VersionStatus::Published);
}

#[test]
fn publish_set_rejects_non_draft() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let err = service.publish_set(set_id).unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::InvalidStatus {
            status: VersionStatus::Published,
            ..
        }
    ));
}

#[test]
fn delete_draft_set_discards_exclusive_draft_members() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();

    service.delete_set(set_id, None).unwrap();

    assert!(service.get_set(set_id, &[]).unwrap().is_none());
    assert_eq!(row_count(&conn, "cross_sections"), 0);
    assert_eq!(row_count(&conn, "set_members"), 0);
}

#[test]
fn delete_draft_set_keeps_members_shared_with_published_version() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(15.76)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();
    let forked_id = service
        .update_set(
            set_id,
            &submission("Argon collisions", vec![elastic_process(0.0), ionization_process(16.0)]),
            None,
        )
        .unwrap();
    let forked = service.get_set(forked_id, &[]).unwrap().unwrap();
    let shared_elastic = member_with_threshold(&forked, 0.0);
    let draft_ionization = member_with_threshold(&forked, 16.0);

    service.delete_set(forked_id, None).unwrap();

    assert!(service.get_set(forked_id, &[]).unwrap().is_none());
    assert!(!section_exists(&conn, draft_ionization.uuid));
    assert!(section_exists(&conn, shared_elastic.uuid));
    assert_eq!(row_count(&conn, "set_history"), 0);

    let old_after = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(old_after.set.version_info.status, VersionStatus::Published);
    assert_eq!(old_after.members.len(), 2);
}

#[test]
fn delete_published_set_requires_retract_message() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let err = service.delete_set(set_id, None).unwrap_err();
    assert!(matches!(err, SetServiceError::RetractMessageRequired));

    service
        .delete_set(set_id, Some("data quality concerns"))
        .unwrap();

    let detail = service.get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.set.version_info.status, VersionStatus::Retracted);
    assert_eq!(
        detail.set.version_info.retract_message.as_deref(),
        Some("data quality concerns")
    );
    assert_eq!(
        detail.members[0].version_info.status,
        VersionStatus::Published
    );
}

#[test]
fn delete_archived_set_is_rejected() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();
    let forked_id = service
        .update_set(
            set_id,
            &submission("Argon elastic", vec![elastic_process(1.0)]),
            None,
        )
        .unwrap();
    service.publish_set(forked_id).unwrap();

    let err = service.delete_set(set_id, Some("too old")).unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::InvalidStatus {
            status: VersionStatus::Archived,
            ..
        }
    ));
}

#[test]
fn update_rejects_foreign_contributor() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let mut foreign = submission("Argon elastic", vec![elastic_process(1.0)]);
    foreign.contributor = foreign_contributor();

    let err = service.update_set(set_id, &foreign, None).unwrap_err();
    assert!(matches!(
        err,
        SetServiceError::OrganizationMismatch { organization, .. }
            if organization == "Rival Institute"
    ));
}

#[test]
fn update_unknown_set_is_not_found() {
    let conn = setup();
    let service = SetService::new(&conn);
    let unknown = Uuid::new_v4();

    let err = service
        .update_set(
            unknown,
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, SetServiceError::SetNotFound(id) if id == unknown));
}

#[test]
fn get_set_honors_status_allow_list() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();

    assert!(service
        .get_set(set_id, &[VersionStatus::Published])
        .unwrap()
        .is_none());
    assert!(service
        .get_set(set_id, &[VersionStatus::Draft, VersionStatus::Published])
        .unwrap()
        .is_some());
    assert!(service.get_set(set_id, &[]).unwrap().is_some());
}

#[test]
fn get_owned_set_enforces_ownership() {
    let conn = setup();
    let service = SetService::new(&conn);
    let set_id = service
        .create_set(
            &submission("Argon elastic", vec![elastic_process(0.0)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();

    let owned = service.get_owned_set(&contributor(), set_id).unwrap();
    assert_eq!(owned.set.uuid, set_id);

    let err = service
        .get_owned_set(&foreign_contributor(), set_id)
        .unwrap_err();
    assert!(matches!(err, SetServiceError::OrganizationMismatch { .. }));
}

#[test]
fn list_organization_sets_filters_status_and_unknown_org() {
    let conn = setup();
    let service = SetService::new(&conn);
    let draft_id = service
        .create_set(
            &submission("Argon draft pack", vec![elastic_process(0.0)]),
            VersionStatus::Draft,
            None,
        )
        .unwrap();
    let published_id = service
        .create_set(
            &submission("Argon published pack", vec![ionization_process(15.76)]),
            VersionStatus::Published,
            None,
        )
        .unwrap();

    let all = service
        .list_organization_sets("CNRS Plasma", &[])
        .unwrap();
    assert_eq!(all.len(), 2);
    let ids: Vec<_> = all.iter().map(|record| record.uuid).collect();
    assert!(ids.contains(&draft_id));
    assert!(ids.contains(&published_id));

    let published_only = service
        .list_organization_sets("CNRS Plasma", &[VersionStatus::Published])
        .unwrap();
    assert_eq!(published_only.len(), 1);
    assert_eq!(published_only[0].uuid, published_id);

    let unknown = service
        .list_organization_sets("Nonexistent Lab", &[])
        .unwrap();
    assert!(unknown.is_empty());
}

fn submission(name: &str, processes: Vec<ProcessSubmission>) -> SetSubmission {
    let mut states = BTreeMap::new();
    states.insert("e".to_string(), json!({ "particle": "e", "charge": -1 }));
    states.insert("Ar".to_string(), json!({ "particle": "Ar", "charge": 0 }));
    states.insert("Ar^+".to_string(), json!({ "particle": "Ar", "charge": 1 }));

    let mut references = BTreeMap::new();
    references.insert(
        "hayashi1981".to_string(),
        json!({ "type": "article", "year": 1981 }),
    );

    SetSubmission {
        name: name.to_string(),
        description: "Swarm-derived argon data".to_string(),
        complete: false,
        contributor: contributor(),
        states,
        references,
        processes,
    }
}

fn elastic_process(threshold: f64) -> ProcessSubmission {
    ProcessSubmission {
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
    }
}

fn ionization_process(threshold: f64) -> ProcessSubmission {
    ProcessSubmission {
        reaction: ReactionInput {
            lhs: vec![entry(1, "e"), entry(1, "Ar")],
            rhs: vec![entry(2, "e"), entry(1, "Ar^+")],
            reversible: false,
            type_tags: vec!["ionization".to_string()],
        },
        threshold,
        data: SectionData::LookupTable {
            labels: ["Energy".to_string(), "Cross section".to_string()],
            units: ["eV".to_string(), "m^2".to_string()],
            values: vec![[15.76, 0.0], [30.0, 2.5e-21]],
        },
        parameters: None,
        references: vec!["hayashi1981".to_string()],
    }
}

fn entry(count: u32, state: &str) -> ReactionEntry {
    ReactionEntry {
        count,
        state: state.to_string(),
    }
}

fn sole_member(conn: &Connection, set_id: SetId) -> CrossSectionRecord {
    let detail = SetService::new(conn).get_set(set_id, &[]).unwrap().unwrap();
    assert_eq!(detail.members.len(), 1);
    detail.members.into_iter().next().unwrap()
}

fn member_with_threshold(detail: &SetDetail, threshold: f64) -> CrossSectionRecord {
    detail
        .members
        .iter()
        .find(|member| member.content.threshold == threshold)
        .cloned()
        .unwrap_or_else(|| panic!("no member with threshold {threshold}"))
}

fn section_exists(conn: &Connection, id: Uuid) -> bool {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM cross_sections WHERE uuid = ?1);",
            [id.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    exists == 1
}

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
