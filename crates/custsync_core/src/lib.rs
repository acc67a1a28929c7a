//! Core of the customer sync engine.
//! Owns the local store, the identity map and every sync component.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_schema, Database, DbError, Schema};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::customer::{
    Customer, CustomerFields, CustomerValidationError, ExternalId, LocalId,
};
pub use repo::customer_repo::{CustomerRepository, RepoError, RepoResult, SqliteCustomerRepository};
pub use repo::identity_repo::{IdentityEntry, IdentityMap, SqliteIdentityMap};
pub use service::customer_service::{CustomerService, LinkedCreate};
pub use sync::channel::{ChannelLog, MemoryLog, SqliteLog, TopicLayout};
pub use sync::dispatcher::{ApplyOutcome, DispatchCounts, Dispatcher};
pub use sync::envelope::{Direction, Operation, Origin, SyncEnvelope};
pub use sync::error::{SyncError, SyncResult};
pub use sync::reconcile::{LocalSnapshot, ReconcileReport, ReconciliationPoller};
pub use sync::remote::{InMemoryDirectory, RemoteDirectory, RemoteRecord, TaggedError};
pub use sync::runtime::{ShutdownSignal, SyncEngine, SyncRuntime, SyncRuntimeHandle};
pub use sync::webhook::WebhookIngestor;

/// Minimal health-check API for wiring probes.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
