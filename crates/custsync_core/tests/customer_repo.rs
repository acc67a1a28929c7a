use custsync_core::{
    open_db_in_memory, CustomerFields, CustomerRepository, CustomerValidationError, IdentityMap,
    RepoError, SqliteCustomerRepository, SqliteIdentityMap,
};

#[test]
fn create_then_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);

    let created = repo
        .create_customer(&CustomerFields::new("Ada Lovelace", "ada@x.com"))
        .unwrap();
    let loaded = repo.get_customer(created.local_id).unwrap().unwrap();

    assert_eq!(loaded, created);
    assert_eq!(loaded.email, "ada@x.com");
}

#[test]
fn duplicate_email_is_a_validation_error() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    repo.create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();

    let err = repo
        .create_customer(&CustomerFields::new("Another Ada", "ada@x.com"))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(CustomerValidationError::DuplicateEmail(ref email)) if email == "ada@x.com"
    ));
}

#[test]
fn blank_name_and_bad_email_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);

    let blank = repo
        .create_customer(&CustomerFields::new("  ", "ada@x.com"))
        .unwrap_err();
    assert!(matches!(
        blank,
        RepoError::Validation(CustomerValidationError::EmptyName)
    ));

    let bad_email = repo
        .create_customer(&CustomerFields::new("Ada", "not-an-email"))
        .unwrap_err();
    assert!(matches!(
        bad_email,
        RepoError::Validation(CustomerValidationError::InvalidEmail(_))
    ));
}

#[test]
fn update_may_keep_own_email_but_not_take_another() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    let ada = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();
    repo.create_customer(&CustomerFields::new("Grace", "grace@x.com"))
        .unwrap();

    let renamed = repo
        .update_customer(ada.local_id, &CustomerFields::new("Ada L.", "ada@x.com"))
        .unwrap();
    assert_eq!(renamed.name, "Ada L.");

    let err = repo
        .update_customer(ada.local_id, &CustomerFields::new("Ada", "grace@x.com"))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(CustomerValidationError::DuplicateEmail(_))
    ));
}

#[test]
fn update_and_delete_of_missing_customer_are_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);

    let update = repo
        .update_customer(42, &CustomerFields::new("Ghost", "ghost@x.com"))
        .unwrap_err();
    assert!(matches!(update, RepoError::NotFound(42)));

    let delete = repo.delete_customer(42).unwrap_err();
    assert!(matches!(delete, RepoError::NotFound(42)));
}

#[test]
fn deleted_ids_are_never_reused() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);

    let first = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();
    repo.delete_customer(first.local_id).unwrap();
    let second = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();

    assert!(second.local_id > first.local_id);
    assert!(repo.get_customer(first.local_id).unwrap().is_none());
}

#[test]
fn list_by_ids_skips_missing_and_orders_by_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    let ada = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();
    let grace = repo
        .create_customer(&CustomerFields::new("Grace", "grace@x.com"))
        .unwrap();

    let listed = repo
        .list_customers_by_ids(&[grace.local_id, 999, ada.local_id])
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|customer| customer.local_id).collect();
    assert_eq!(ids, vec![ada.local_id, grace.local_id]);
    assert!(repo.list_customers_by_ids(&[]).unwrap().is_empty());
}

#[test]
fn pending_sync_clears_only_for_matching_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    let ada = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();
    repo.set_pending_sync(ada.local_id, true).unwrap();

    let stale = CustomerFields::new("Ada", "ada@old.com");
    assert!(!repo.clear_pending_sync(ada.local_id, &stale).unwrap());
    assert_eq!(repo.list_pending_sync_ids().unwrap(), vec![ada.local_id]);

    assert!(repo.clear_pending_sync(ada.local_id, &ada.fields()).unwrap());
    assert!(repo.list_pending_sync_ids().unwrap().is_empty());
    assert!(!repo.clear_pending_sync(ada.local_id, &ada.fields()).unwrap());
}

#[test]
fn set_pending_sync_on_missing_customer_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    let err = repo.set_pending_sync(404, true).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(404)));
}

#[test]
fn unmapped_customers_exclude_linked_rows() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCustomerRepository::new(&conn);
    let ada = repo
        .create_customer(&CustomerFields::new("Ada", "ada@x.com"))
        .unwrap();
    let bob = repo
        .create_customer(&CustomerFields::new("Bob", "bob@x.com"))
        .unwrap();
    SqliteIdentityMap::new(&conn).put(ada.local_id, "cus_1").unwrap();

    assert_eq!(repo.list_unmapped_customers().unwrap(), vec![bob]);
}
