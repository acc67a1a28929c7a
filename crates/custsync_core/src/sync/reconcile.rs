//! Reconciliation poller.
//!
//! # Responsibility
//! - Periodically compare the remote directory with the identity map and the
//!   local store, and emit `to-local` envelopes for every remote drift found.
//! - Re-emit `to-remote` envelopes for local state the remote directory has
//!   not confirmed: unmapped customers, rows still marked `pending_sync`, and
//!   mappings whose local row is gone.
//!
//! # Invariants
//! - The poller only emits envelopes; the dispatcher applies them through the
//!   same path as live traffic.
//! - A run without drift emits nothing.
//! - A pending local edit is never overwritten by the remote copy; it is
//!   pushed again instead.
//! - Re-emitted `to-remote` envelopes may duplicate ones still queued; the
//!   dispatcher resolves those as already applied or no-op.

use crate::db::Database;
use crate::model::customer::{Customer, LocalId};
use crate::repo::customer_repo::{CustomerRepository, SqliteCustomerRepository};
use crate::repo::identity_repo::{IdentityEntry, IdentityMap, SqliteIdentityMap};
use crate::sync::envelope::{Direction, Operation, SyncEnvelope};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::publisher::EnvelopePublisher;
use crate::sync::remote::{RemoteDirectory, RemoteRecord};
use crate::sync::runtime::ShutdownSignal;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub remote_records: usize,
    /// `to-local` creates.
    pub creates: usize,
    /// `to-local` updates.
    pub updates: usize,
    /// `to-local` deletes.
    pub deletes: usize,
    /// `to-remote` envelopes of any operation.
    pub pushes: usize,
}

impl ReconcileReport {
    pub fn emitted(&self) -> usize {
        self.creates + self.updates + self.deletes + self.pushes
    }

    fn count(&mut self, envelope: &SyncEnvelope) {
        match (envelope.direction, envelope.operation) {
            (Direction::ToRemote, _) => self.pushes += 1,
            (Direction::ToLocal, Operation::Create) => self.creates += 1,
            (Direction::ToLocal, Operation::Update) => self.updates += 1,
            (Direction::ToLocal, Operation::Delete) => self.deletes += 1,
        }
    }
}

/// Local side of one pass, read in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub entries: Vec<IdentityEntry>,
    /// Mapped customers that still exist locally.
    pub mapped: HashMap<LocalId, Customer>,
    /// Customers without an identity entry.
    pub unmapped: Vec<Customer>,
    /// Customers whose latest local edit is not yet confirmed remotely.
    pub pending: HashSet<LocalId>,
}

/// Computes the envelopes that bring both sides in line.
pub fn diff(remote: &[RemoteRecord], local: &LocalSnapshot) -> Vec<SyncEnvelope> {
    let by_external: HashMap<&str, LocalId> = local
        .entries
        .iter()
        .map(|entry| (entry.external_id.as_str(), entry.local_id))
        .collect();
    let mut envelopes = Vec::new();

    for record in remote {
        let fields = record.fields();
        let Some(local_id) = by_external.get(record.id.as_str()) else {
            envelopes.push(SyncEnvelope::inbound(
                Operation::Create,
                Some(record.id.clone()),
                None,
                Some(fields),
            ));
            continue;
        };
        let Some(customer) = local.mapped.get(local_id) else {
            continue;
        };
        if customer.matches(&fields) {
            continue;
        }
        if local.pending.contains(local_id) {
            envelopes.push(SyncEnvelope::outbound(
                Operation::Update,
                *local_id,
                Some(customer.fields()),
            ));
        } else {
            envelopes.push(SyncEnvelope::inbound(
                Operation::Update,
                Some(record.id.clone()),
                Some(*local_id),
                Some(fields),
            ));
        }
    }

    let remote_ids: HashSet<&str> = remote.iter().map(|record| record.id.as_str()).collect();
    for entry in &local.entries {
        if !remote_ids.contains(entry.external_id.as_str()) {
            envelopes.push(SyncEnvelope::inbound(
                Operation::Delete,
                Some(entry.external_id.clone()),
                Some(entry.local_id),
                None,
            ));
        } else if !local.mapped.contains_key(&entry.local_id) {
            envelopes.push(SyncEnvelope::outbound(Operation::Delete, entry.local_id, None));
        }
    }

    for customer in &local.unmapped {
        envelopes.push(SyncEnvelope::outbound(
            Operation::Create,
            customer.local_id,
            Some(customer.fields()),
        ));
    }

    envelopes
}

/// Periodic remote-to-local drift detector.
#[derive(Clone)]
pub struct ReconciliationPoller {
    db: Database,
    remote: Arc<dyn RemoteDirectory>,
    publisher: EnvelopePublisher,
}

impl ReconciliationPoller {
    pub fn new(db: Database, remote: Arc<dyn RemoteDirectory>, publisher: EnvelopePublisher) -> Self {
        Self {
            db,
            remote,
            publisher,
        }
    }

    /// Computes the envelopes of one pass without publishing them.
    pub fn plan(&self) -> SyncResult<Vec<SyncEnvelope>> {
        let local = self.load_local()?;
        let remote = self.list_remote()?;
        Ok(diff(&remote, &local))
    }

    /// Runs one pass and publishes every envelope it finds.
    ///
    /// Stops at the first publish failure; envelopes already sent stay sent
    /// and the next pass recomputes the rest.
    pub fn run_once(&self) -> SyncResult<ReconcileReport> {
        let started_at = Instant::now();
        // Local first: a mapping seen here existed before the remote listing,
        // so its absence there is a real remote delete.
        let local = self.load_local()?;
        let remote = self.list_remote()?;

        let mut report = ReconcileReport {
            remote_records: remote.len(),
            ..ReconcileReport::default()
        };
        for envelope in diff(&remote, &local) {
            self.publisher.publish(&envelope)?;
            report.count(&envelope);
        }

        info!(
            "event=reconcile_run module=reconcile status=ok remote_records={} mapped={} creates={} updates={} deletes={} pushes={} duration_ms={}",
            report.remote_records,
            local.entries.len(),
            report.creates,
            report.updates,
            report.deletes,
            report.pushes,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn list_remote(&self) -> SyncResult<Vec<RemoteRecord>> {
        self.remote.list().map_err(SyncError::RemoteUnavailable)
    }

    fn load_local(&self) -> SyncResult<LocalSnapshot> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let snapshot = {
            let entries = SqliteIdentityMap::new(&tx).snapshot()?;
            let ids: Vec<LocalId> = entries.iter().map(|entry| entry.local_id).collect();
            let repo = SqliteCustomerRepository::new(&tx);
            let mapped = repo
                .list_customers_by_ids(&ids)?
                .into_iter()
                .map(|customer| (customer.local_id, customer))
                .collect();
            LocalSnapshot {
                entries,
                mapped,
                unmapped: repo.list_unmapped_customers()?,
                pending: repo.list_pending_sync_ids()?.into_iter().collect(),
            }
        };
        tx.commit()?;
        Ok(snapshot)
    }

    /// Runs a pass every `interval` until `shutdown` fires.
    ///
    /// A failed pass is logged and the next interval tries again.
    pub fn run_every(&self, interval: Duration, shutdown: &ShutdownSignal) -> usize {
        let mut passes = 0;
        while !shutdown.is_triggered() {
            match self.run_once() {
                Ok(_) => passes += 1,
                Err(err @ SyncError::RemoteUnavailable(_)) => {
                    warn!(
                        "event=reconcile_run module=reconcile status=skip error_code={} error={}",
                        err.code(),
                        err.log_detail()
                    );
                }
                Err(err) => {
                    error!(
                        "event=reconcile_run module=reconcile status=error error_code={} error={}",
                        err.code(),
                        err.log_detail()
                    );
                }
            }
            if shutdown.wait_timeout(interval) {
                break;
            }
        }
        info!("event=reconcile_loop module=reconcile status=stopped passes={passes}");
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::{diff, LocalSnapshot};
    use crate::model::customer::Customer;
    use crate::repo::identity_repo::IdentityEntry;
    use crate::sync::envelope::{Direction, Operation};
    use crate::sync::remote::RemoteRecord;

    fn remote(id: &str, name: &str) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@x.com", name.to_lowercase()),
        }
    }

    fn customer(local_id: i64, name: &str) -> Customer {
        Customer {
            local_id,
            name: name.to_string(),
            email: format!("{}@x.com", name.to_lowercase()),
        }
    }

    /// Snapshot where every `(local_id, external_id, name)` is mapped and
    /// present locally.
    fn mapped(rows: &[(i64, &str, &str)]) -> LocalSnapshot {
        LocalSnapshot {
            entries: rows
                .iter()
                .map(|(local_id, external_id, _)| IdentityEntry {
                    local_id: *local_id,
                    external_id: external_id.to_string(),
                })
                .collect(),
            mapped: rows
                .iter()
                .map(|(local_id, _, name)| (*local_id, customer(*local_id, name)))
                .collect(),
            ..LocalSnapshot::default()
        }
    }

    #[test]
    fn in_sync_sides_produce_nothing() {
        let remote = vec![remote("A", "Ada"), remote("B", "Bob")];
        let local = mapped(&[(1, "A", "Ada"), (2, "B", "Bob")]);
        assert!(diff(&remote, &local).is_empty());
    }

    #[test]
    fn unmapped_remote_record_becomes_create() {
        let envelopes = diff(&[remote("A", "Ada")], &LocalSnapshot::default());
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].direction, Direction::ToLocal);
        assert_eq!(envelopes[0].operation, Operation::Create);
        assert_eq!(envelopes[0].external_id(), Some("A"));
        assert_eq!(envelopes[0].local_id(), None);
    }

    #[test]
    fn changed_fields_become_update_carrying_both_ids() {
        let local = mapped(&[(1, "A", "Adeline")]);
        let envelopes = diff(&[remote("A", "Ada")], &local);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].direction, Direction::ToLocal);
        assert_eq!(envelopes[0].operation, Operation::Update);
        assert_eq!(envelopes[0].local_id(), Some(1));
        assert_eq!(envelopes[0].fields().unwrap().name, "Ada");
    }

    #[test]
    fn pending_local_edit_is_pushed_instead_of_overwritten() {
        let mut local = mapped(&[(1, "A", "Adeline")]);
        local.pending.insert(1);

        let envelopes = diff(&[remote("A", "Ada")], &local);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].direction, Direction::ToRemote);
        assert_eq!(envelopes[0].operation, Operation::Update);
        assert_eq!(envelopes[0].local_id(), Some(1));
        assert_eq!(envelopes[0].fields().unwrap().name, "Adeline");
    }

    #[test]
    fn mapping_missing_remotely_becomes_delete_for_that_local_id_only() {
        let remote = vec![remote("A", "Ada"), remote("B", "Bob")];
        let local = mapped(&[(1, "A", "Ada"), (2, "B", "Bob"), (3, "C", "Cy")]);

        let envelopes = diff(&remote, &local);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].operation, Operation::Delete);
        assert_eq!(envelopes[0].local_id(), Some(3));
        assert_eq!(envelopes[0].external_id(), Some("C"));
    }

    #[test]
    fn mapping_without_local_record_pushes_remote_delete() {
        let mut local = mapped(&[(1, "A", "Ada")]);
        local.mapped.clear();

        let envelopes = diff(&[remote("A", "Ada")], &local);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].direction, Direction::ToRemote);
        assert_eq!(envelopes[0].operation, Operation::Delete);
        assert_eq!(envelopes[0].local_id(), Some(1));
    }

    #[test]
    fn unmapped_local_customer_is_pushed_as_create() {
        let local = LocalSnapshot {
            unmapped: vec![customer(4, "Dee")],
            ..LocalSnapshot::default()
        };

        let envelopes = diff(&[], &local);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].direction, Direction::ToRemote);
        assert_eq!(envelopes[0].operation, Operation::Create);
        assert_eq!(envelopes[0].local_id(), Some(4));
        assert_eq!(envelopes[0].fields().unwrap().email, "dee@x.com");
    }
}
