//! Envelope publishing.
//!
//! # Responsibility
//! - [`EnvelopePublisher`]: encode an envelope onto its (topic, lane) and wait
//!   for the channel's acknowledgment.
//! - [`ChangePublisher`]: turn a local mutation intent into a `to-remote`
//!   envelope, unless the mutation was itself applied from a remote-origin
//!   envelope.
//!
//! # Invariants
//! - A publish either returns an acknowledgment or `PublishFailure`; there is
//!   no fire-and-forget path.
//! - Remote-origin mutations are never published (echo suppression).

use crate::model::customer::{Customer, CustomerFields, LocalId};
use crate::sync::channel::{ChannelProducer, DeliveryAck, TopicLayout};
use crate::sync::envelope::{Operation, Origin, SyncEnvelope};
use crate::sync::error::{SyncError, SyncResult};
use log::{debug, error};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Encodes envelopes and sends them, blocking until acknowledged.
#[derive(Clone)]
pub struct EnvelopePublisher {
    producer: Arc<dyn ChannelProducer>,
    layout: TopicLayout,
    timeout: Duration,
}

impl EnvelopePublisher {
    pub fn new(producer: Arc<dyn ChannelProducer>, layout: TopicLayout, timeout: Duration) -> Self {
        Self {
            producer,
            layout,
            timeout,
        }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    pub fn publish(&self, envelope: &SyncEnvelope) -> SyncResult<DeliveryAck> {
        envelope.validate()?;
        let record = envelope.encode(&self.layout)?;
        let started_at = Instant::now();

        match self.producer.send(record, self.timeout) {
            Ok(ack) => {
                debug!(
                    "event=envelope_publish module=publisher status=ok direction={} operation={} origin={} subject={} topic={} lane={} offset={} duration_ms={}",
                    envelope.direction,
                    envelope.operation,
                    envelope.origin.as_str(),
                    envelope.subject(),
                    ack.topic,
                    ack.lane,
                    ack.offset,
                    started_at.elapsed().as_millis()
                );
                Ok(ack)
            }
            Err(err) => {
                error!(
                    "event=envelope_publish module=publisher status=error direction={} operation={} subject={} duration_ms={} error={}",
                    envelope.direction,
                    envelope.operation,
                    envelope.subject(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(SyncError::PublishFailure(err))
            }
        }
    }
}

/// A local mutation that has been written but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationIntent {
    pub operation: Operation,
    pub local_id: LocalId,
    /// Present for create/update.
    pub fields: Option<CustomerFields>,
}

impl MutationIntent {
    pub fn created(customer: &Customer) -> Self {
        Self {
            operation: Operation::Create,
            local_id: customer.local_id,
            fields: Some(customer.fields()),
        }
    }

    pub fn updated(customer: &Customer) -> Self {
        Self {
            operation: Operation::Update,
            local_id: customer.local_id,
            fields: Some(customer.fields()),
        }
    }

    pub fn deleted(local_id: LocalId) -> Self {
        Self {
            operation: Operation::Delete,
            local_id,
            fields: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(DeliveryAck),
    /// The mutation came from a remote-origin envelope; nothing was sent.
    Suppressed,
}

/// Publishes local mutations toward the remote directory.
#[derive(Clone)]
pub struct ChangePublisher {
    publisher: EnvelopePublisher,
}

impl ChangePublisher {
    pub fn new(publisher: EnvelopePublisher) -> Self {
        Self { publisher }
    }

    /// Publishes `intent` on `to-remote` when `origin` is local.
    ///
    /// Callers must hold their local transaction open until this returns and
    /// commit only on `Ok`.
    pub fn publish_change(
        &self,
        intent: &MutationIntent,
        origin: Origin,
    ) -> SyncResult<PublishOutcome> {
        if origin == Origin::Remote {
            debug!(
                "event=change_publish module=publisher status=skip reason=remote_origin operation={} local_id={}",
                intent.operation, intent.local_id
            );
            return Ok(PublishOutcome::Suppressed);
        }

        let envelope =
            SyncEnvelope::outbound(intent.operation, intent.local_id, intent.fields.clone());
        self.publisher
            .publish(&envelope)
            .map(PublishOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangePublisher, EnvelopePublisher, MutationIntent, PublishOutcome};
    use crate::model::customer::Customer;
    use crate::sync::channel::{MemoryLog, TopicLayout};
    use crate::sync::envelope::Origin;
    use crate::sync::error::SyncError;
    use std::sync::Arc;
    use std::time::Duration;

    fn publisher(log: &MemoryLog) -> ChangePublisher {
        ChangePublisher::new(EnvelopePublisher::new(
            Arc::new(log.clone()),
            TopicLayout::default(),
            Duration::from_millis(100),
        ))
    }

    fn ada() -> Customer {
        Customer {
            local_id: 7,
            name: "Ada Lovelace".to_string(),
            email: "ada@x.com".to_string(),
        }
    }

    #[test]
    fn local_origin_publishes_on_operation_lane() {
        let log = MemoryLog::new();
        let outcome = publisher(&log)
            .publish_change(&MutationIntent::updated(&ada()), Origin::Local)
            .unwrap();

        assert!(matches!(outcome, PublishOutcome::Published(ref ack) if ack.lane == 1));
        assert_eq!(log.records("to-remote", 1).len(), 1);
    }

    #[test]
    fn remote_origin_is_suppressed() {
        let log = MemoryLog::new();
        let outcome = publisher(&log)
            .publish_change(&MutationIntent::created(&ada()), Origin::Remote)
            .unwrap();

        assert_eq!(outcome, PublishOutcome::Suppressed);
        assert_eq!(log.topic_len("to-remote"), 0);
    }

    #[test]
    fn unacknowledged_send_is_a_publish_failure() {
        let log = MemoryLog::new();
        log.set_available(false);
        let err = publisher(&log)
            .publish_change(&MutationIntent::deleted(7), Origin::Local)
            .unwrap_err();
        assert!(matches!(err, SyncError::PublishFailure(_)));
    }
}
