//! Durable channel log stored in its own SQLite file.
//!
//! # Invariants
//! - A send is acknowledged only after its insert transaction commits.
//! - Offsets are dense per (topic, lane) and assigned under the write lock.
//! - Committed offsets only move forward.
//! - The log file must not be the customer store: publishes happen while a
//!   customer write transaction is still open. The file carries its own
//!   schema chain, and opening a customer store here fails with
//!   `DbError::SchemaMismatch`.

use super::{
    check_lane, ChannelConsumer, ChannelError, ChannelLog, ChannelProducer, ChannelRecord,
    Delivery, DeliveryAck, LANE_COUNT,
};
use crate::db::{Database, Schema};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const IDLE_BACKOFF: Duration = Duration::from_millis(25);

type LaneKey = (String, u8);

/// Handle to a SQLite-backed log.
#[derive(Debug, Clone)]
pub struct SqliteLog {
    db: Database,
}

impl SqliteLog {
    /// Opens (creating if needed) the log file.
    ///
    /// # Errors
    /// - Returns `ChannelError::Storage` when the file cannot be opened or
    ///   migrated; callers treat this as fatal at startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let db = Database::with_schema(path, Schema::ChannelLog);
        db.connect()?;
        info!(
            "event=channel_open module=channel status=ok backend=sqlite path={}",
            db.path().display()
        );
        Ok(Self { db })
    }
}

impl ChannelProducer for SqliteLog {
    fn send(&self, record: ChannelRecord, timeout: Duration) -> Result<DeliveryAck, ChannelError> {
        check_lane(record.lane)?;
        let mut conn = self.db.connect()?;
        conn.busy_timeout(timeout)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let offset: i64 = tx.query_row(
            "SELECT COALESCE(MAX(record_offset) + 1, 0)
             FROM channel_records
             WHERE topic = ?1 AND lane = ?2;",
            params![record.topic.as_str(), i64::from(record.lane)],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO channel_records (topic, lane, record_offset, record_key, value)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                record.topic.as_str(),
                i64::from(record.lane),
                offset,
                record.key.as_deref(),
                record.value.as_slice(),
            ],
        )?;
        tx.commit()?;

        Ok(DeliveryAck {
            topic: record.topic,
            lane: record.lane,
            offset: offset as u64,
        })
    }
}

impl ChannelLog for SqliteLog {
    fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Box<dyn ChannelConsumer>, ChannelError> {
        let conn = self.db.connect()?;
        let partitions = topics
            .iter()
            .flat_map(|topic| (0..LANE_COUNT).map(move |lane| (topic.clone(), lane)))
            .collect();
        Ok(Box::new(SqliteConsumer {
            conn,
            group: group.to_string(),
            partitions,
            positions: HashMap::new(),
            next_partition: 0,
        }))
    }
}

/// Consumer-group member reading from a [`SqliteLog`].
pub struct SqliteConsumer {
    conn: Connection,
    group: String,
    partitions: Vec<LaneKey>,
    positions: HashMap<LaneKey, u64>,
    next_partition: usize,
}

impl SqliteConsumer {
    fn position(&mut self, key: &LaneKey) -> Result<u64, ChannelError> {
        if let Some(position) = self.positions.get(key) {
            return Ok(*position);
        }
        let committed: Option<i64> = self
            .conn
            .query_row(
                "SELECT committed
                 FROM consumer_offsets
                 WHERE consumer_group = ?1 AND topic = ?2 AND lane = ?3;",
                params![self.group.as_str(), key.0.as_str(), i64::from(key.1)],
                |row| row.get(0),
            )
            .optional()?;
        let position = committed.map_or(0, |value| value.max(0) as u64);
        self.positions.insert(key.clone(), position);
        Ok(position)
    }

    fn take_next(&mut self) -> Result<Option<Delivery>, ChannelError> {
        let count = self.partitions.len();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let key = self.partitions[index].clone();
            let position = self.position(&key)?;

            let found = self
                .conn
                .query_row(
                    "SELECT record_offset, record_key, value
                     FROM channel_records
                     WHERE topic = ?1 AND lane = ?2 AND record_offset >= ?3
                     ORDER BY record_offset ASC
                     LIMIT 1;",
                    params![key.0.as_str(), i64::from(key.1), position as i64],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((offset, record_key, value)) = found else {
                continue;
            };

            let offset = offset as u64;
            self.positions.insert(key.clone(), offset + 1);
            self.next_partition = (index + 1) % count;
            return Ok(Some(Delivery {
                record: ChannelRecord {
                    topic: key.0,
                    lane: key.1,
                    key: record_key,
                    value,
                },
                offset,
            }));
        }
        Ok(None)
    }
}

impl ChannelConsumer for SqliteConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.take_next()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(IDLE_BACKOFF.min(deadline - now));
        }
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.conn.execute(
            "INSERT INTO consumer_offsets (consumer_group, topic, lane, committed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (consumer_group, topic, lane)
             DO UPDATE SET committed = MAX(committed, excluded.committed);",
            params![
                self.group.as_str(),
                delivery.record.topic.as_str(),
                i64::from(delivery.record.lane),
                (delivery.offset + 1) as i64,
            ],
        )?;
        debug!(
            "event=channel_commit module=channel status=ok backend=sqlite group={} topic={} lane={} offset={}",
            self.group, delivery.record.topic, delivery.record.lane, delivery.offset
        );
        Ok(())
    }
}
