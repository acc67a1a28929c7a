use custsync_core::db::{open_db, open_db_in_memory, open_db_with_schema, Database, DbError, Schema};
use custsync_core::SqliteLog;
use rusqlite::Connection;

fn latest_version() -> u32 {
    Schema::CustomerStore.latest_version()
}

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "customers", true);
    assert_table_exists(&conn, "identity_map", true);
    assert_table_exists(&conn, "channel_records", false);
    assert_table_exists(&conn, "consumer_offsets", false);
}

#[test]
fn channel_log_file_carries_only_log_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channel.db");
    SqliteLog::open(&path).unwrap();

    let conn = open_db_with_schema(&path, Schema::ChannelLog).unwrap();
    assert_eq!(schema_version(&conn), Schema::ChannelLog.latest_version());
    assert_table_exists(&conn, "channel_records", true);
    assert_table_exists(&conn, "consumer_offsets", true);
    assert_table_exists(&conn, "customers", false);
    assert_table_exists(&conn, "identity_map", false);
}

#[test]
fn opening_a_file_as_the_other_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("customers.db");
    let log = dir.path().join("channel.db");
    Database::new(&store).connect().unwrap();
    SqliteLog::open(&log).unwrap();

    let err = open_db_with_schema(&store, Schema::ChannelLog).unwrap_err();
    assert!(matches!(
        err,
        DbError::SchemaMismatch {
            expected: Schema::ChannelLog,
            ..
        }
    ));
    assert!(SqliteLog::open(&store).is_err());

    let err = open_db(&log).unwrap_err();
    assert!(matches!(
        err,
        DbError::SchemaMismatch {
            expected: Schema::CustomerStore,
            ..
        }
    ));
}

#[test]
fn customer_rows_start_without_pending_sync() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO customers (name, email) VALUES ('Ada', 'ada@x.com');",
        [],
    )
    .unwrap();
    let pending: i64 = conn
        .query_row("SELECT pending_sync FROM customers;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(pending, 0);
}

#[test]
fn connecting_twice_through_database_handle_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("customers.db"));

    let first = db.connect().unwrap();
    assert_eq!(schema_version(&first), latest_version());
    first
        .execute(
            "INSERT INTO customers (name, email) VALUES ('Ada', 'ada@x.com');",
            [],
        )
        .unwrap();
    drop(first);

    let second = db.connect().unwrap();
    assert_eq!(schema_version(&second), latest_version());
    let count: i64 = second
        .query_row("SELECT COUNT(*) FROM customers;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn connections_enforce_unique_identity_columns() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO identity_map (local_id, external_id) VALUES (1, 'cus_1');",
        [],
    )
    .unwrap();

    let same_external = conn.execute(
        "INSERT INTO identity_map (local_id, external_id) VALUES (2, 'cus_1');",
        [],
    );
    assert!(same_external.is_err());
    let same_local = conn.execute(
        "INSERT INTO identity_map (local_id, external_id) VALUES (1, 'cus_2');",
        [],
    );
    assert!(same_local.is_err());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            schema,
            db_version,
            latest_supported,
        } => {
            assert_eq!(schema, Schema::CustomerStore);
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str, expected: bool) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists == 1, expected, "table {table_name} presence");
}
