//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register one migration chain per [`Schema`] in strictly increasing order.
//! - Apply pending migrations atomically.
//! - Tag every file with its schema so a channel log is never migrated as a
//!   customer store, or the reverse.
//!
//! # Invariants
//! - `version` values must remain monotonic within a chain.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - The owning schema is recorded in `PRAGMA application_id`.
//! - The version is re-read under the write lock, so concurrent openers of a
//!   fresh file apply each migration exactly once.

use crate::db::{DbError, DbResult};
use rusqlite::{Connection, TransactionBehavior};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const CUSTOMER_STORE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("customer_store/0001_customers.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("customer_store/0002_identity_map.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("customer_store/0003_pending_sync.sql"),
    },
];

const CHANNEL_LOG_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("channel_log/0001_channel_records.sql"),
}];

/// Family of tables kept in one SQLite file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Customers and the identity map.
    CustomerStore,
    /// Channel records and consumer-group offsets.
    ChannelLog,
}

impl Schema {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerStore => "customer_store",
            Self::ChannelLog => "channel_log",
        }
    }

    /// Value stored in `PRAGMA application_id` ("csc1" / "csl1").
    pub const fn application_id(self) -> i32 {
        match self {
            Self::CustomerStore => 0x6373_6331,
            Self::ChannelLog => 0x6373_6c31,
        }
    }

    /// Latest migration version known by this binary for this schema.
    pub fn latest_version(self) -> u32 {
        self.migrations()
            .last()
            .map_or(0, |migration| migration.version)
    }

    fn migrations(self) -> &'static [Migration] {
        match self {
            Self::CustomerStore => CUSTOMER_STORE_MIGRATIONS,
            Self::ChannelLog => CHANNEL_LOG_MIGRATIONS,
        }
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies all pending migrations of `schema` on the provided connection.
///
/// # Errors
/// - `SchemaMismatch` when the file is tagged with another schema.
/// - `UnsupportedSchemaVersion` when the file is newer than this binary.
pub fn apply_migrations(conn: &mut Connection, schema: Schema) -> DbResult<()> {
    if is_current(conn, schema)? {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if is_current(&tx, schema)? {
        return Ok(());
    }

    let current_version = current_user_version(&tx)?;
    for migration in schema.migrations() {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.execute_batch(&format!(
        "PRAGMA application_id = {};",
        schema.application_id()
    ))?;
    tx.commit()?;

    Ok(())
}

/// Returns `true` when the file already carries the latest `schema`.
fn is_current(conn: &Connection, schema: Schema) -> DbResult<bool> {
    let found = conn.query_row("PRAGMA application_id;", [], |row| row.get::<_, i32>(0))?;
    if found != 0 && found != schema.application_id() {
        return Err(DbError::SchemaMismatch {
            expected: schema,
            found,
        });
    }

    let current = current_user_version(conn)?;
    let latest = schema.latest_version();
    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            schema,
            db_version: current,
            latest_supported: latest,
        });
    }
    Ok(current == latest && found == schema.application_id())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
