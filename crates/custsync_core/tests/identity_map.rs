use custsync_core::repo::identity_repo::PutOutcome;
use custsync_core::{open_db_in_memory, IdentityEntry, IdentityMap, RepoError, SqliteIdentityMap};

#[test]
fn put_then_lookup_both_directions() {
    let conn = open_db_in_memory().unwrap();
    let map = SqliteIdentityMap::new(&conn);

    assert_eq!(map.put(7, "cus_123").unwrap(), PutOutcome::Inserted);
    assert_eq!(map.by_local(7).unwrap().as_deref(), Some("cus_123"));
    assert_eq!(map.by_external("cus_123").unwrap(), Some(7));
    assert_eq!(map.by_local(8).unwrap(), None);
    assert_eq!(map.by_external("cus_999").unwrap(), None);
}

#[test]
fn reputting_identical_pair_is_a_noop_success() {
    let conn = open_db_in_memory().unwrap();
    let map = SqliteIdentityMap::new(&conn);

    map.put(7, "cus_123").unwrap();
    assert_eq!(map.put(7, "cus_123").unwrap(), PutOutcome::AlreadyMapped);
    assert_eq!(map.snapshot().unwrap().len(), 1);
}

#[test]
fn conflicting_puts_fail_on_either_key() {
    let conn = open_db_in_memory().unwrap();
    let map = SqliteIdentityMap::new(&conn);
    map.put(7, "cus_123").unwrap();

    let same_local = map.put(7, "cus_456").unwrap_err();
    match same_local {
        RepoError::Conflict(conflict) => {
            assert_eq!(conflict.mapped_external.as_deref(), Some("cus_123"));
            assert_eq!(conflict.mapped_local, None);
        }
        other => panic!("unexpected error: {other}"),
    }

    let same_external = map.put(8, "cus_123").unwrap_err();
    match same_external {
        RepoError::Conflict(conflict) => {
            assert_eq!(conflict.mapped_external, None);
            assert_eq!(conflict.mapped_local, Some(7));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn remove_reports_whether_an_entry_existed() {
    let conn = open_db_in_memory().unwrap();
    let map = SqliteIdentityMap::new(&conn);
    map.put(7, "cus_123").unwrap();

    assert!(map.remove(7).unwrap());
    assert!(!map.remove(7).unwrap());
    assert_eq!(map.by_external("cus_123").unwrap(), None);
}

#[test]
fn snapshot_is_ordered_by_local_id() {
    let conn = open_db_in_memory().unwrap();
    let map = SqliteIdentityMap::new(&conn);
    map.put(3, "C").unwrap();
    map.put(1, "A").unwrap();
    map.put(2, "B").unwrap();

    let entries = map.snapshot().unwrap();
    assert_eq!(
        entries,
        vec![
            IdentityEntry {
                local_id: 1,
                external_id: "A".to_string()
            },
            IdentityEntry {
                local_id: 2,
                external_id: "B".to_string()
            },
            IdentityEntry {
                local_id: 3,
                external_id: "C".to_string()
            },
        ]
    );
}
