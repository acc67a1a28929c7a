//! Sync envelope: the unit carried on the channel.
//!
//! # Responsibility
//! - Describe one cross-system mutation: direction, operation, origin and a
//!   JSON-compatible payload.
//! - Encode envelopes into channel records addressed by (topic, lane) and
//!   decode them back, rejecting anything inconsistent.
//!
//! # Invariants
//! - The lane index is fixed per operation (0=create, 1=update, 2=delete).
//! - The explicit `operation` field must agree with the lane it arrived on;
//!   operation is never inferred from payload shape.
//! - Under a per-direction topic layout the topic must agree with the
//!   envelope's `direction`.

use crate::model::customer::{CustomerFields, ExternalId, LocalId};
use crate::sync::channel::{ChannelRecord, TopicLayout};
use crate::sync::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Which store a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    ToRemote,
    ToLocal,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToRemote => "to-remote",
            Self::ToLocal => "to-local",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation kind, bound one-to-one to a lane index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Self::Create, Self::Update, Self::Delete];

    pub const fn lane(self) -> u8 {
        match self {
            Self::Create => 0,
            Self::Update => 1,
            Self::Delete => 2,
        }
    }

    pub fn from_lane(lane: u8) -> Option<Self> {
        match lane {
            0 => Some(Self::Create),
            1 => Some(Self::Update),
            2 => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side that initiated a mutation; drives echo suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A direct local mutation request.
    Local,
    /// A change first observed on the remote directory.
    Remote,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Wire payload. Field names follow the remote integration's JSON contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<LocalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<ExternalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub event_id: Uuid,
    pub direction: Direction,
    pub operation: Operation,
    pub origin: Origin,
    pub payload: EnvelopePayload,
}

impl SyncEnvelope {
    pub fn new(
        direction: Direction,
        operation: Operation,
        origin: Origin,
        payload: EnvelopePayload,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            direction,
            operation,
            origin,
            payload,
        }
    }

    /// Envelope for a local mutation headed to the remote directory.
    pub fn outbound(
        operation: Operation,
        local_id: LocalId,
        fields: Option<CustomerFields>,
    ) -> Self {
        Self::new(
            Direction::ToRemote,
            operation,
            Origin::Local,
            EnvelopePayload {
                customer_id: Some(local_id),
                customer: fields,
                stripe_customer_id: None,
            },
        )
    }

    /// Envelope for a remote change headed to the local store.
    pub fn inbound(
        operation: Operation,
        external_id: Option<ExternalId>,
        local_id: Option<LocalId>,
        fields: Option<CustomerFields>,
    ) -> Self {
        Self::new(
            Direction::ToLocal,
            operation,
            Origin::Remote,
            EnvelopePayload {
                customer_id: local_id,
                customer: fields,
                stripe_customer_id: external_id,
            },
        )
    }

    pub fn local_id(&self) -> Option<LocalId> {
        self.payload.customer_id
    }

    pub fn external_id(&self) -> Option<&str> {
        self.payload.stripe_customer_id.as_deref()
    }

    pub fn fields(&self) -> Option<&CustomerFields> {
        self.payload.customer.as_ref()
    }

    /// Identifier used as the record key and in log lines.
    pub fn subject(&self) -> String {
        match (self.direction, self.external_id(), self.local_id()) {
            (Direction::ToLocal, Some(external_id), _) => format!("external:{external_id}"),
            (_, _, Some(local_id)) => format!("local:{local_id}"),
            (_, Some(external_id), None) => format!("external:{external_id}"),
            (_, None, None) => "unknown".to_string(),
        }
    }

    /// Checks that the payload carries what its (direction, operation) needs.
    pub fn validate(&self) -> SyncResult<()> {
        let needs_fields = matches!(self.operation, Operation::Create | Operation::Update);
        if needs_fields && self.payload.customer.is_none() {
            return Err(self.malformed("missing `customer` fields"));
        }

        let has_local = self.payload.customer_id.is_some();
        let has_external = self.payload.stripe_customer_id.is_some();
        match (self.direction, self.operation) {
            (Direction::ToRemote, _) if !has_local => {
                Err(self.malformed("missing `customer_id`"))
            }
            (Direction::ToLocal, Operation::Create) if !has_external => {
                Err(self.malformed("missing `stripe_customer_id`"))
            }
            (Direction::ToLocal, _) if !has_local && !has_external => {
                Err(self.malformed("missing both `customer_id` and `stripe_customer_id`"))
            }
            _ => Ok(()),
        }
    }

    /// Serializes into a record on the lane fixed by `operation`.
    pub fn encode(&self, layout: &TopicLayout) -> SyncResult<ChannelRecord> {
        let value = serde_json::to_vec(self)
            .map_err(|err| SyncError::MalformedEnvelope(format!("serialize failed: {err}")))?;
        Ok(ChannelRecord {
            topic: layout.topic_for(self.direction).to_string(),
            lane: self.operation.lane(),
            key: Some(self.subject()),
            value,
        })
    }

    /// Parses a record, cross-checking lane and topic against the body.
    pub fn decode(record: &ChannelRecord, layout: &TopicLayout) -> SyncResult<Self> {
        let lane_operation = Operation::from_lane(record.lane).ok_or_else(|| {
            SyncError::MalformedEnvelope(format!(
                "unknown lane {} on topic `{}`",
                record.lane, record.topic
            ))
        })?;

        let envelope: SyncEnvelope = serde_json::from_slice(&record.value).map_err(|err| {
            SyncError::MalformedEnvelope(format!(
                "unparseable payload on `{}`[{}]: {err}",
                record.topic, record.lane
            ))
        })?;

        if envelope.operation != lane_operation {
            return Err(SyncError::MalformedEnvelope(format!(
                "operation `{}` arrived on lane {} ({lane_operation})",
                envelope.operation, record.lane
            )));
        }

        match layout.direction_of(&record.topic) {
            Some(direction) if direction != envelope.direction => {
                return Err(SyncError::MalformedEnvelope(format!(
                    "direction `{}` arrived on topic `{}`",
                    envelope.direction, record.topic
                )));
            }
            None if !layout.carries(&record.topic) => {
                return Err(SyncError::MalformedEnvelope(format!(
                    "unknown topic `{}`",
                    record.topic
                )));
            }
            _ => {}
        }

        envelope.validate()?;
        Ok(envelope)
    }

    fn malformed(&self, reason: &str) -> SyncError {
        SyncError::MalformedEnvelope(format!(
            "{}/{} envelope {}: {reason}",
            self.direction, self.operation, self.event_id
        ))
    }
}
