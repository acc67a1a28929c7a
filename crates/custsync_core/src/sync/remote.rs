//! Remote directory client contract.
//!
//! # Responsibility
//! - Describe the external directory as create/get/update/delete/list calls
//!   that return either a record or a [`TaggedError`].
//! - Provide an in-process directory with Stripe-like ids for wiring and
//!   tests.
//!
//! # Invariants
//! - Clients never panic on remote failure; every failure is a tagged value.
//! - A call on an unknown id fails with code `resource_missing`.

use crate::model::customer::{CustomerFields, ExternalId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

const RESOURCE_MISSING: &str = "resource_missing";
const API_UNAVAILABLE: &str = "api_connection_error";

pub type RemoteResult<T> = Result<T, TaggedError>;

/// Failure returned by a remote call: `{error, details}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedError {
    pub error: String,
    pub details: Value,
}

impl TaggedError {
    pub fn new(error: impl Into<String>, details: Value) -> Self {
        Self {
            error: error.into(),
            details,
        }
    }

    /// Machine-readable code carried in `details.code`, if any.
    pub fn code(&self) -> Option<&str> {
        self.details.get("code").and_then(Value::as_str)
    }

    /// Whether the addressed record does not exist remotely.
    pub fn is_resource_missing(&self) -> bool {
        self.code() == Some(RESOURCE_MISSING)
    }
}

impl Display for TaggedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} ({code})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl Error for TaggedError {}

/// Remote-side customer snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: ExternalId,
    pub name: String,
    pub email: String,
}

impl RemoteRecord {
    pub fn fields(&self) -> CustomerFields {
        CustomerFields::new(self.name.clone(), self.email.clone())
    }
}

/// External directory collaborator.
pub trait RemoteDirectory: Send + Sync {
    fn create(&self, fields: &CustomerFields) -> RemoteResult<RemoteRecord>;
    fn get(&self, id: &str) -> RemoteResult<RemoteRecord>;
    fn update(&self, id: &str, fields: &CustomerFields) -> RemoteResult<RemoteRecord>;
    fn delete(&self, id: &str) -> RemoteResult<RemoteRecord>;
    fn list(&self) -> RemoteResult<Vec<RemoteRecord>>;
}

struct DirectoryState {
    records: BTreeMap<ExternalId, RemoteRecord>,
    next_id: u64,
    available: bool,
    create_calls: usize,
}

/// In-process directory issuing `cus_<n>` identifiers.
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory whose first issued id is `cus_<first_id>`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                records: BTreeMap::new(),
                next_id: first_id,
                available: true,
                create_calls: 0,
            }),
        }
    }

    /// Simulates an outage; every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Inserts or replaces a record out of band, as a remote user would.
    pub fn seed(&self, record: RemoteRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Removes a record out of band without going through the sync engine.
    pub fn forget(&self, id: &str) -> Option<RemoteRecord> {
        self.lock().records.remove(id)
    }

    pub fn snapshot(&self) -> Vec<RemoteRecord> {
        self.lock().records.values().cloned().collect()
    }

    /// Number of successful `create` calls so far.
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, action: &str) -> RemoteResult<MutexGuard<'_, DirectoryState>> {
        let state = self.lock();
        if !state.available {
            return Err(TaggedError::new(
                format!("Unable to {action} Customer"),
                json!({ "code": API_UNAVAILABLE, "message": "directory unreachable" }),
            ));
        }
        Ok(state)
    }
}

fn missing(action: &str, id: &str) -> TaggedError {
    TaggedError::new(
        format!("Unable to {action} Customer"),
        json!({ "code": RESOURCE_MISSING, "message": format!("No such customer: '{id}'") }),
    )
}

impl RemoteDirectory for InMemoryDirectory {
    fn create(&self, fields: &CustomerFields) -> RemoteResult<RemoteRecord> {
        let mut state = self.guard("create")?;
        let id = format!("cus_{}", state.next_id);
        state.next_id += 1;
        state.create_calls += 1;

        let record = RemoteRecord {
            id: id.clone(),
            name: fields.name.clone(),
            email: fields.email.clone(),
        };
        state.records.insert(id, record.clone());
        Ok(record)
    }

    fn get(&self, id: &str) -> RemoteResult<RemoteRecord> {
        let state = self.guard("get")?;
        state.records.get(id).cloned().ok_or_else(|| missing("get", id))
    }

    fn update(&self, id: &str, fields: &CustomerFields) -> RemoteResult<RemoteRecord> {
        let mut state = self.guard("update")?;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| missing("update", id))?;
        record.name = fields.name.clone();
        record.email = fields.email.clone();
        Ok(record.clone())
    }

    fn delete(&self, id: &str) -> RemoteResult<RemoteRecord> {
        let mut state = self.guard("delete")?;
        state.records.remove(id).ok_or_else(|| missing("delete", id))
    }

    fn list(&self) -> RemoteResult<Vec<RemoteRecord>> {
        let state = self.guard("list")?;
        Ok(state.records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryDirectory, RemoteDirectory};
    use crate::model::customer::CustomerFields;

    #[test]
    fn issues_sequential_stripe_like_ids() {
        let directory = InMemoryDirectory::starting_at(123);
        let first = directory
            .create(&CustomerFields::new("Ada", "ada@x.com"))
            .unwrap();
        let second = directory
            .create(&CustomerFields::new("Grace", "grace@x.com"))
            .unwrap();
        assert_eq!(first.id, "cus_123");
        assert_eq!(second.id, "cus_124");
        assert_eq!(directory.create_calls(), 2);
    }

    #[test]
    fn unknown_ids_fail_with_resource_missing() {
        let directory = InMemoryDirectory::new();
        let err = directory.delete("cus_404").unwrap_err();
        assert!(err.is_resource_missing());
        assert_eq!(err.error, "Unable to delete Customer");
    }

    #[test]
    fn outage_returns_tagged_error_instead_of_panicking() {
        let directory = InMemoryDirectory::new();
        directory.set_available(false);
        let err = directory.list().unwrap_err();
        assert!(!err.is_resource_missing());
        assert_eq!(err.code(), Some("api_connection_error"));
    }
}
