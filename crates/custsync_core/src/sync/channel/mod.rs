//! Partitioned channel abstraction.
//!
//! # Responsibility
//! - Address records by topic and lane; map sync directions onto topics via a
//!   configurable [`TopicLayout`].
//! - Define the producer/consumer contracts implemented by log backends.
//!
//! # Invariants
//! - Every topic has exactly [`LANE_COUNT`] lanes; lanes are FIFO.
//! - `send` returns only after the record is durably appended (acknowledged).
//! - Consumers deliver at-least-once: a delivery that is never committed is
//!   delivered again to the next consumer of the same group.
//! - No ordering is promised across lanes or topics.

mod memory;
mod sqlite;

pub use memory::{MemoryConsumer, MemoryLog};
pub use sqlite::{SqliteConsumer, SqliteLog};

use crate::db::DbError;
use crate::sync::envelope::Direction;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Lanes per topic: 0=create, 1=update, 2=delete.
pub const LANE_COUNT: u8 = 3;

/// One record as stored on a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub topic: String,
    pub lane: u8,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

/// A record handed to a consumer, with its lane offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub record: ChannelRecord,
    pub offset: u64,
}

/// Acknowledgment that a record was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub topic: String,
    pub lane: u8,
    pub offset: u64,
}

#[derive(Debug)]
pub enum ChannelError {
    /// The log cannot be reached or refused the operation.
    Unavailable(String),
    /// The operation did not complete within its timeout.
    Timeout(Duration),
    InvalidLane(u8),
    Storage(DbError),
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "channel unavailable: {reason}"),
            Self::Timeout(timeout) => write!(f, "channel timed out after {timeout:?}"),
            Self::InvalidLane(lane) => {
                write!(f, "lane {lane} outside 0..{LANE_COUNT}")
            }
            Self::Storage(err) => write!(f, "channel storage error: {err}"),
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ChannelError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for ChannelError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

/// Appends records and waits for acknowledgment.
pub trait ChannelProducer: Send + Sync {
    fn send(&self, record: ChannelRecord, timeout: Duration) -> Result<DeliveryAck, ChannelError>;
}

/// One member of a consumer group.
pub trait ChannelConsumer: Send {
    /// Blocks up to `timeout` for the next record; `Ok(None)` on an empty poll.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError>;
    /// Marks `delivery` (and everything before it on its lane) as processed.
    fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError>;
}

/// A log backend: a producer that can also hand out group consumers.
pub trait ChannelLog: ChannelProducer {
    fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Box<dyn ChannelConsumer>, ChannelError>;
}

/// How sync directions map onto topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum TopicLayout {
    /// One topic per direction; the topic identifies the direction.
    PerDirection { to_remote: String, to_local: String },
    /// One shared topic; the direction travels in the envelope body.
    Single { topic: String },
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self::PerDirection {
            to_remote: "to-remote".to_string(),
            to_local: "to-local".to_string(),
        }
    }
}

impl TopicLayout {
    pub fn topic_for(&self, direction: Direction) -> &str {
        match (self, direction) {
            (Self::PerDirection { to_remote, .. }, Direction::ToRemote) => to_remote,
            (Self::PerDirection { to_local, .. }, Direction::ToLocal) => to_local,
            (Self::Single { topic }, _) => topic,
        }
    }

    /// Direction implied by `topic`; `None` under a shared topic or for a
    /// topic this layout does not carry.
    pub fn direction_of(&self, topic: &str) -> Option<Direction> {
        match self {
            Self::PerDirection { to_remote, .. } if to_remote == topic => {
                Some(Direction::ToRemote)
            }
            Self::PerDirection { to_local, .. } if to_local == topic => Some(Direction::ToLocal),
            _ => None,
        }
    }

    pub fn carries(&self, topic: &str) -> bool {
        self.subscriptions().iter().any(|candidate| candidate == topic)
    }

    /// Topics the dispatcher subscribes to.
    pub fn subscriptions(&self) -> Vec<String> {
        match self {
            Self::PerDirection {
                to_remote,
                to_local,
            } => vec![to_remote.clone(), to_local.clone()],
            Self::Single { topic } => vec![topic.clone()],
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::PerDirection {
                to_remote,
                to_local,
            } => {
                if to_remote.trim().is_empty() || to_local.trim().is_empty() {
                    return Err("topic names must not be empty".to_string());
                }
                if to_remote == to_local {
                    return Err(format!(
                        "per-direction layout needs distinct topics, both are `{to_remote}`"
                    ));
                }
                Ok(())
            }
            Self::Single { topic } if topic.trim().is_empty() => {
                Err("topic name must not be empty".to_string())
            }
            Self::Single { .. } => Ok(()),
        }
    }
}

fn check_lane(lane: u8) -> Result<(), ChannelError> {
    if lane >= LANE_COUNT {
        return Err(ChannelError::InvalidLane(lane));
    }
    Ok(())
}
