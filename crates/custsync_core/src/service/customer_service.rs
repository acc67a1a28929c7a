//! Customer mutation entry point.
//!
//! # Responsibility
//! - Accept "local mutation requested" calls and apply them to the local store.
//! - Gate every local commit on the change publisher's acknowledgment.
//! - Serve the dispatcher's remote-origin writes through the same path, with
//!   publication suppressed.
//!
//! # Invariants
//! - Validation (including duplicate email) fails before anything is published.
//! - A local-origin mutation commits only after its `to-remote` envelope is
//!   acknowledged; a publish failure rolls the transaction back.
//! - Remote-origin creates insert the customer and its identity entry in one
//!   transaction; remote-origin deletes drop both in one transaction.
//! - Local-origin creates and updates set `pending_sync` in the same
//!   transaction; remote-origin writes clear it. The dispatcher clears it once
//!   the remote directory holds the same fields.
//! - The envelope can be acknowledged and the commit still fail. That case is
//!   logged (`commit_after_publish_failed`). A create is undone by the
//!   dispatcher's post-create check; anything else is left to reconciliation.

use crate::db::Database;
use crate::model::customer::{Customer, CustomerFields, LocalId};
use crate::repo::customer_repo::{CustomerRepository, SqliteCustomerRepository};
use crate::repo::identity_repo::{IdentityMap, SqliteIdentityMap};
use crate::sync::envelope::Origin;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::publisher::{ChangePublisher, MutationIntent, PublishOutcome};
use log::{error, info, warn};
use rusqlite::{Transaction, TransactionBehavior};

/// Result of a create that also links an external id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedCreate {
    Created(Customer),
    /// The external id was already mapped to this local customer.
    AlreadyLinked(LocalId),
}

/// Use-case service for local customer mutations.
#[derive(Clone)]
pub struct CustomerService {
    db: Database,
    publisher: ChangePublisher,
}

impl CustomerService {
    pub fn new(db: Database, publisher: ChangePublisher) -> Self {
        Self { db, publisher }
    }

    /// Creates a customer and, for local origin, publishes `to-remote/create`.
    pub fn create_customer(&self, fields: CustomerFields, origin: Origin) -> SyncResult<Customer> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let customer = SqliteCustomerRepository::new(&tx).create_customer(&fields)?;
        SqliteCustomerRepository::new(&tx)
            .set_pending_sync(customer.local_id, origin == Origin::Local)?;

        self.commit_after_publish(tx, &MutationIntent::created(&customer), origin)?;
        info!(
            "event=customer_create module=customer_service status=ok origin={} local_id={}",
            origin.as_str(),
            customer.local_id
        );
        Ok(customer)
    }

    /// Creates a customer already known remotely as `external_id`.
    ///
    /// The identity check, the insert and the identity write share one
    /// transaction, so a concurrent duplicate create either sees the mapping
    /// or fails on the unique constraint.
    pub fn create_linked_customer(
        &self,
        fields: CustomerFields,
        external_id: &str,
        origin: Origin,
    ) -> SyncResult<LinkedCreate> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let identity = SqliteIdentityMap::new(&tx);
        if let Some(local_id) = identity.by_external(external_id)? {
            return Ok(LinkedCreate::AlreadyLinked(local_id));
        }
        let customer = SqliteCustomerRepository::new(&tx).create_customer(&fields)?;
        identity.put(customer.local_id, external_id)?;

        self.commit_after_publish(tx, &MutationIntent::created(&customer), origin)?;
        info!(
            "event=customer_create module=customer_service status=ok origin={} local_id={} external_id={}",
            origin.as_str(),
            customer.local_id,
            external_id
        );
        Ok(LinkedCreate::Created(customer))
    }

    /// Replaces name and email of an existing customer.
    pub fn update_customer(
        &self,
        local_id: LocalId,
        fields: CustomerFields,
        origin: Origin,
    ) -> SyncResult<Customer> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let customer = SqliteCustomerRepository::new(&tx).update_customer(local_id, &fields)?;
        SqliteCustomerRepository::new(&tx).set_pending_sync(local_id, origin == Origin::Local)?;

        self.commit_after_publish(tx, &MutationIntent::updated(&customer), origin)?;
        info!(
            "event=customer_update module=customer_service status=ok origin={} local_id={}",
            origin.as_str(),
            local_id
        );
        Ok(customer)
    }

    /// Deletes a customer.
    ///
    /// Local origin: a missing customer is `NotFound`, and the identity entry
    /// is kept until the `to-remote/delete` envelope is applied.
    /// Remote origin: the identity entry goes in the same transaction, and a
    /// missing customer is a no-op returning `None`.
    pub fn delete_customer(
        &self,
        local_id: LocalId,
        origin: Origin,
    ) -> SyncResult<Option<Customer>> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = SqliteCustomerRepository::new(&tx).get_customer(local_id)?;
        if origin == Origin::Remote {
            SqliteIdentityMap::new(&tx).remove(local_id)?;
        }

        let Some(customer) = existing else {
            if origin == Origin::Local {
                return Err(SyncError::NotFound(local_id));
            }
            tx.commit()?;
            return Ok(None);
        };
        SqliteCustomerRepository::new(&tx).delete_customer(local_id)?;

        self.commit_after_publish(tx, &MutationIntent::deleted(local_id), origin)?;
        info!(
            "event=customer_delete module=customer_service status=ok origin={} local_id={}",
            origin.as_str(),
            local_id
        );
        Ok(Some(customer))
    }

    /// Records that the remote directory now holds `fields` for `local_id`.
    ///
    /// Returns `false` when the row is gone, was not pending, or has since
    /// been edited to other fields.
    pub fn confirm_synced(&self, local_id: LocalId, fields: &CustomerFields) -> SyncResult<bool> {
        let conn = self.db.connect()?;
        let cleared = SqliteCustomerRepository::new(&conn).clear_pending_sync(local_id, fields)?;
        Ok(cleared)
    }

    pub fn get_customer(&self, local_id: LocalId) -> SyncResult<Option<Customer>> {
        let conn = self.db.connect()?;
        let customer = SqliteCustomerRepository::new(&conn).get_customer(local_id)?;
        Ok(customer)
    }

    fn commit_after_publish(
        &self,
        tx: Transaction<'_>,
        intent: &MutationIntent,
        origin: Origin,
    ) -> SyncResult<()> {
        let outcome = match self.publisher.publish_change(intent, origin) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "event=local_commit module=customer_service status=rollback reason={} operation={} local_id={}",
                    err.code(),
                    intent.operation,
                    intent.local_id
                );
                return Err(err);
            }
        };

        if let Err(err) = tx.commit() {
            if matches!(outcome, PublishOutcome::Published(_)) {
                error!(
                    "event=local_commit module=customer_service status=error error_code=commit_after_publish_failed operation={} local_id={} error={}",
                    intent.operation, intent.local_id, err
                );
            }
            return Err(err.into());
        }
        Ok(())
    }
}
