//! Identity map contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the one-to-one correlation between local and external ids.
//! - Offer point lookups in both directions plus a full snapshot for
//!   reconciliation.
//!
//! # Invariants
//! - At most one entry per `local_id` and per `external_id` (both columns
//!   are unique in `identity_map`).
//! - Entries are never updated in place; they are inserted once and removed.
//! - `put` is insert-if-absent: the insert itself is the check, so two racing
//!   writers cannot both succeed with different pairs.

use crate::model::customer::{ExternalId, LocalId};
use crate::repo::customer_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One persisted correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityEntry {
    pub local_id: LocalId,
    pub external_id: ExternalId,
}

/// Result of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// The identical pair was already stored.
    AlreadyMapped,
}

/// A `put` collided with an existing, different mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConflict {
    pub local_id: LocalId,
    pub external_id: ExternalId,
    /// External id currently mapped to `local_id`, if any.
    pub mapped_external: Option<ExternalId>,
    /// Local id currently mapped to `external_id`, if any.
    pub mapped_local: Option<LocalId>,
}

impl Display for IdentityConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "identity conflict for ({}, {}): local mapped to {:?}, external mapped to {:?}",
            self.local_id, self.external_id, self.mapped_external, self.mapped_local
        )
    }
}

impl Error for IdentityConflict {}

/// Bidirectional local/external identifier correlation.
pub trait IdentityMap {
    fn put(&self, local_id: LocalId, external_id: &str) -> RepoResult<PutOutcome>;
    fn by_local(&self, local_id: LocalId) -> RepoResult<Option<ExternalId>>;
    fn by_external(&self, external_id: &str) -> RepoResult<Option<LocalId>>;
    /// Removes the entry for `local_id`; returns whether one existed.
    fn remove(&self, local_id: LocalId) -> RepoResult<bool>;
    /// Returns every entry, ordered by `local_id`.
    fn snapshot(&self) -> RepoResult<Vec<IdentityEntry>>;
}

/// SQLite-backed identity map.
pub struct SqliteIdentityMap<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteIdentityMap<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl IdentityMap for SqliteIdentityMap<'_> {
    fn put(&self, local_id: LocalId, external_id: &str) -> RepoResult<PutOutcome> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO identity_map (local_id, external_id) VALUES (?1, ?2);",
            params![local_id, external_id],
        )?;
        if inserted == 1 {
            return Ok(PutOutcome::Inserted);
        }

        let mapped_external = self.by_local(local_id)?;
        let mapped_local = self.by_external(external_id)?;
        if mapped_external.as_deref() == Some(external_id) {
            return Ok(PutOutcome::AlreadyMapped);
        }

        Err(RepoError::Conflict(IdentityConflict {
            local_id,
            external_id: external_id.to_string(),
            mapped_external,
            mapped_local,
        }))
    }

    fn by_local(&self, local_id: LocalId) -> RepoResult<Option<ExternalId>> {
        let value = self
            .conn
            .query_row(
                "SELECT external_id FROM identity_map WHERE local_id = ?1;",
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn by_external(&self, external_id: &str) -> RepoResult<Option<LocalId>> {
        let value = self
            .conn
            .query_row(
                "SELECT local_id FROM identity_map WHERE external_id = ?1;",
                [external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn remove(&self, local_id: LocalId) -> RepoResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM identity_map WHERE local_id = ?1;", [local_id])?;
        Ok(removed > 0)
    }

    fn snapshot(&self) -> RepoResult<Vec<IdentityEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT local_id, external_id FROM identity_map ORDER BY local_id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(IdentityEntry {
                local_id: row.get("local_id")?,
                external_id: row.get("external_id")?,
            });
        }
        Ok(entries)
    }
}
