//! SQLite files used by the sync engine.
//!
//! Two kinds of file exist: the customer store (customers plus identity map)
//! and, for the durable channel backend, the channel log. Each is opened
//! through a [`Database`] handle that knows its [`Schema`] and migrates the
//! file before the first statement runs. Connections are per operation.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use migrations::Schema;
pub use open::{open_db, open_db_in_memory, open_db_with_schema, Database};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was migrated by a newer build.
    UnsupportedSchemaVersion {
        schema: Schema,
        db_version: u32,
        latest_supported: u32,
    },
    /// The file is tagged with another schema's `application_id`.
    SchemaMismatch { expected: Schema, found: i32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                schema,
                db_version,
                latest_supported,
            } => write!(
                f,
                "{schema} version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaMismatch { expected, found } => write!(
                f,
                "expected a {expected} file, found application_id {found:#x}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
