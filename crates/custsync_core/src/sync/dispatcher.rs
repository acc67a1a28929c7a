//! Inbound dispatcher.
//!
//! # Responsibility
//! - Consume both directions' lanes, decode each record, and apply it to the
//!   remote directory or the local store.
//! - Keep the identity map consistent with what was applied.
//!
//! # Invariants
//! - Each envelope is terminal in one pass: applied, already applied, no-op,
//!   or failed and dropped. There is no retry here; reconciliation re-derives
//!   whatever a failed pass left behind.
//! - Create is idempotent per identifier: the mapping check and the write are
//!   serialized by a per-key lock and backed by the identity table's unique
//!   constraints.
//! - No database transaction or SQLite lock is held across a remote call.
//!   The per-key lock is an in-process mutex scoped to one identifier; a
//!   slow remote call only delays later envelopes for the same customer.
//! - A `to-remote/create` re-reads the local row after writing the mapping.
//!   The mapping write waits for any open customer transaction, so a row
//!   deleted meanwhile (or never committed) is seen as gone and the remote
//!   record is removed again. Lane order therefore does not matter.
//! - `to-local` writes carry remote origin, so they are never re-published.
//! - Offsets are committed after the envelope reaches a terminal state, so a
//!   crash before that point redelivers it.

use crate::db::Database;
use crate::model::customer::{CustomerFields, LocalId};
use crate::repo::customer_repo::RepoResult;
use crate::repo::identity_repo::{IdentityMap, SqliteIdentityMap};
use crate::service::customer_service::{CustomerService, LinkedCreate};
use crate::sync::channel::{ChannelConsumer, ChannelRecord, Delivery, TopicLayout};
use crate::sync::envelope::{Direction, Operation, Origin, SyncEnvelope};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::locks::KeyedLocks;
use crate::sync::remote::RemoteDirectory;
use crate::sync::runtime::ShutdownSignal;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Terminal success states of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The effect was already present (e.g. the mapping existed).
    AlreadyApplied,
    /// Nothing to do: counterpart unresolved on delete, or fields unchanged.
    NoOp,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::NoOp => "noop",
        }
    }
}

/// Running counters shared between the dispatcher and its observers.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    applied: AtomicU64,
    already_applied: AtomicU64,
    noop: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub received: u64,
    pub applied: u64,
    pub already_applied: u64,
    pub noop: u64,
    /// Malformed, unsupported or unresolved envelopes.
    pub dropped: u64,
    /// Remote, store or identity failures.
    pub failed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            already_applied: self.already_applied.load(Ordering::Relaxed),
            noop: self.noop.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &SyncResult<ApplyOutcome>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(ApplyOutcome::Applied) => &self.applied,
            Ok(ApplyOutcome::AlreadyApplied) => &self.already_applied,
            Ok(ApplyOutcome::NoOp) => &self.noop,
            Err(err) if is_drop(err) => &self.dropped,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn is_drop(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::MalformedEnvelope(_)
            | SyncError::UnsupportedEvent(_)
            | SyncError::UnresolvedReference { .. }
    )
}

/// Routes envelopes to their apply handler.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    remote: Arc<dyn RemoteDirectory>,
    customers: CustomerService,
    layout: TopicLayout,
    locks: Arc<KeyedLocks>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteDirectory>,
        customers: CustomerService,
        layout: TopicLayout,
    ) -> Self {
        Self {
            db,
            remote,
            customers,
            layout,
            locks: Arc::new(KeyedLocks::new()),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Applies one decoded envelope.
    pub fn apply(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        envelope.validate()?;
        match (envelope.direction, envelope.operation) {
            (Direction::ToRemote, Operation::Create) => self.remote_create(envelope),
            (Direction::ToRemote, Operation::Update) => self.remote_update(envelope),
            (Direction::ToRemote, Operation::Delete) => self.remote_delete(envelope),
            (Direction::ToLocal, Operation::Create) => self.local_create(envelope),
            (Direction::ToLocal, Operation::Update) => self.local_update(envelope),
            (Direction::ToLocal, Operation::Delete) => self.local_delete(envelope),
        }
    }

    /// Decodes, applies and logs one record. Updates the shared counters.
    pub fn handle_record(&self, record: &ChannelRecord) -> SyncResult<ApplyOutcome> {
        let started_at = Instant::now();
        let envelope = match SyncEnvelope::decode(record, &self.layout) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    "event=envelope_apply module=dispatcher status=skip error_code={} topic={} lane={} error={}",
                    err.code(),
                    record.topic,
                    record.lane,
                    err
                );
                let result = Err(err);
                self.stats.record(&result);
                return result;
            }
        };

        let result = self.apply(&envelope);
        log_outcome(&envelope, &result, started_at);
        self.stats.record(&result);
        result
    }

    /// Consumes until `shutdown` fires.
    ///
    /// Empty polls are skipped; transport errors are logged and the loop waits
    /// one poll interval before trying again.
    pub fn run(
        &self,
        consumer: &mut dyn ChannelConsumer,
        poll_timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> DispatchCounts {
        info!("event=dispatch_loop module=dispatcher status=start");
        while !shutdown.is_triggered() {
            match consumer.poll(poll_timeout) {
                Ok(None) => continue,
                Ok(Some(delivery)) => self.process(consumer, &delivery),
                Err(err) => {
                    warn!(
                        "event=channel_poll module=dispatcher status=error error_code=transport error={}",
                        err
                    );
                    if shutdown.wait_timeout(poll_timeout) {
                        break;
                    }
                }
            }
        }

        let counts = self.stats.snapshot();
        info!(
            "event=dispatch_loop module=dispatcher status=stopped received={} applied={} dropped={} failed={}",
            counts.received, counts.applied, counts.dropped, counts.failed
        );
        counts
    }

    /// Handles records until a poll comes back empty; returns how many.
    pub fn drain(
        &self,
        consumer: &mut dyn ChannelConsumer,
        poll_timeout: Duration,
    ) -> SyncResult<usize> {
        let mut handled = 0;
        while let Some(delivery) = consumer.poll(poll_timeout).map_err(SyncError::Transport)? {
            self.process(consumer, &delivery);
            handled += 1;
        }
        Ok(handled)
    }

    fn process(&self, consumer: &mut dyn ChannelConsumer, delivery: &Delivery) {
        // Logged and counted inside; every terminal state commits.
        let _ = self.handle_record(&delivery.record);
        if let Err(err) = consumer.commit(delivery) {
            warn!(
                "event=offset_commit module=dispatcher status=error topic={} lane={} offset={} error={}",
                delivery.record.topic, delivery.record.lane, delivery.offset, err
            );
        }
    }

    fn remote_create(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let local_id = required_local_id(envelope)?;
        let fields = required_fields(envelope)?;
        let _guard = self.locks.lock(format!("local:{local_id}"));

        if self.identity(|map| map.by_local(local_id))?.is_some() {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        let record = self.remote.create(fields).map_err(SyncError::RemoteUnavailable)?;
        if let Err(err) = self.identity(|map| map.put(local_id, &record.id)) {
            self.compensate_remote_create(local_id, &record.id);
            return match err {
                SyncError::Conflict(conflict) if conflict.mapped_external.is_some() => {
                    Ok(ApplyOutcome::AlreadyApplied)
                }
                other => Err(other),
            };
        }

        if self.customers.get_customer(local_id)?.is_none() {
            // Keep the mapping when the remote delete fails so reconciliation
            // can still reach the orphan.
            if self.compensate_remote_create(local_id, &record.id) {
                self.identity(|map| map.remove(local_id))?;
            }
            return Ok(ApplyOutcome::NoOp);
        }
        self.customers.confirm_synced(local_id, fields)?;
        Ok(ApplyOutcome::Applied)
    }

    /// Deletes a remote record created for `local_id`; returns whether it is
    /// gone.
    fn compensate_remote_create(&self, local_id: LocalId, external_id: &str) -> bool {
        match self.remote.delete(external_id) {
            Ok(_) => {
                warn!(
                    "event=remote_compensate module=dispatcher status=ok local_id={local_id} external_id={external_id}"
                );
                true
            }
            Err(err) if err.is_resource_missing() => true,
            Err(err) => {
                error!(
                    "event=remote_compensate module=dispatcher status=error local_id={local_id} external_id={external_id} error={err}"
                );
                false
            }
        }
    }

    fn remote_update(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let local_id = required_local_id(envelope)?;
        let fields = required_fields(envelope)?;
        let _guard = self.locks.lock(format!("local:{local_id}"));

        let Some(external_id) = self.identity(|map| map.by_local(local_id))? else {
            return Err(unresolved(envelope, format!("local:{local_id}")));
        };
        let current = self
            .remote
            .get(&external_id)
            .map_err(SyncError::RemoteUnavailable)?;
        if current.fields() == *fields {
            self.customers.confirm_synced(local_id, fields)?;
            return Ok(ApplyOutcome::NoOp);
        }

        self.remote
            .update(&external_id, fields)
            .map_err(SyncError::RemoteUnavailable)?;
        self.customers.confirm_synced(local_id, fields)?;
        Ok(ApplyOutcome::Applied)
    }

    fn remote_delete(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let local_id = required_local_id(envelope)?;
        let _guard = self.locks.lock(format!("local:{local_id}"));

        let Some(external_id) = self.identity(|map| map.by_local(local_id))? else {
            return Ok(ApplyOutcome::NoOp);
        };
        match self.remote.delete(&external_id) {
            Ok(_) => {}
            Err(err) if err.is_resource_missing() => {
                debug!(
                    "event=remote_delete module=dispatcher status=skip reason=already_gone external_id={external_id}"
                );
            }
            Err(err) => return Err(SyncError::RemoteUnavailable(err)),
        }

        self.identity(|map| map.remove(local_id))?;
        Ok(ApplyOutcome::Applied)
    }

    fn local_create(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let external_id = envelope
            .external_id()
            .ok_or_else(|| missing(envelope, "stripe_customer_id"))?;
        let fields = required_fields(envelope)?;
        let _guard = self.locks.lock(format!("external:{external_id}"));

        match self
            .customers
            .create_linked_customer(fields.clone(), external_id, Origin::Remote)?
        {
            LinkedCreate::Created(_) => Ok(ApplyOutcome::Applied),
            LinkedCreate::AlreadyLinked(_) => Ok(ApplyOutcome::AlreadyApplied),
        }
    }

    fn local_update(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let fields = required_fields(envelope)?;
        let _guard = self.locks.lock(envelope.subject());

        let Some(local_id) = self.resolve_local(envelope)? else {
            return Err(unresolved(envelope, envelope.subject()));
        };
        let Some(current) = self.customers.get_customer(local_id)? else {
            return Err(unresolved(envelope, format!("local:{local_id}")));
        };
        if current.matches(fields) {
            return Ok(ApplyOutcome::NoOp);
        }

        self.customers
            .update_customer(local_id, fields.clone(), Origin::Remote)?;
        Ok(ApplyOutcome::Applied)
    }

    fn local_delete(&self, envelope: &SyncEnvelope) -> SyncResult<ApplyOutcome> {
        let _guard = self.locks.lock(envelope.subject());

        let Some(local_id) = self.resolve_local(envelope)? else {
            return Ok(ApplyOutcome::NoOp);
        };
        match self.customers.delete_customer(local_id, Origin::Remote)? {
            Some(_) => Ok(ApplyOutcome::Applied),
            None => Ok(ApplyOutcome::NoOp),
        }
    }

    /// Local id named by the envelope, falling back to the identity map.
    fn resolve_local(&self, envelope: &SyncEnvelope) -> SyncResult<Option<LocalId>> {
        if let Some(local_id) = envelope.local_id() {
            return Ok(Some(local_id));
        }
        match envelope.external_id() {
            Some(external_id) => self.identity(|map| map.by_external(external_id)),
            None => Ok(None),
        }
    }

    /// Runs one identity-map operation on a connection scoped to the call.
    fn identity<T>(
        &self,
        op: impl FnOnce(&SqliteIdentityMap<'_>) -> RepoResult<T>,
    ) -> SyncResult<T> {
        let conn = self.db.connect()?;
        let map = SqliteIdentityMap::new(&conn);
        Ok(op(&map)?)
    }
}

fn required_local_id(envelope: &SyncEnvelope) -> SyncResult<LocalId> {
    envelope
        .local_id()
        .ok_or_else(|| missing(envelope, "customer_id"))
}

fn required_fields(envelope: &SyncEnvelope) -> SyncResult<&CustomerFields> {
    envelope
        .fields()
        .ok_or_else(|| missing(envelope, "customer"))
}

fn missing(envelope: &SyncEnvelope, field: &str) -> SyncError {
    SyncError::MalformedEnvelope(format!(
        "{}/{} envelope {} lacks `{field}`",
        envelope.direction, envelope.operation, envelope.event_id
    ))
}

fn unresolved(envelope: &SyncEnvelope, reference: String) -> SyncError {
    SyncError::UnresolvedReference {
        direction: envelope.direction,
        operation: envelope.operation,
        reference,
    }
}

fn log_outcome(envelope: &SyncEnvelope, outcome: &SyncResult<ApplyOutcome>, started_at: Instant) {
    let elapsed = started_at.elapsed().as_millis();
    match outcome {
        Ok(outcome) => info!(
            "event=envelope_apply module=dispatcher status=ok outcome={} direction={} operation={} origin={} subject={} event_id={} duration_ms={}",
            outcome.as_str(),
            envelope.direction,
            envelope.operation,
            envelope.origin.as_str(),
            envelope.subject(),
            envelope.event_id,
            elapsed
        ),
        Err(err) if is_drop(err) => warn!(
            "event=envelope_apply module=dispatcher status=skip error_code={} direction={} operation={} subject={} event_id={} error={}",
            err.code(),
            envelope.direction,
            envelope.operation,
            envelope.subject(),
            envelope.event_id,
            err.log_detail()
        ),
        Err(err) => error!(
            "event=envelope_apply module=dispatcher status=error error_code={} direction={} operation={} subject={} event_id={} duration_ms={} error={}",
            err.code(),
            envelope.direction,
            envelope.operation,
            envelope.subject(),
            envelope.event_id,
            elapsed,
            err.log_detail()
        ),
    }
}
