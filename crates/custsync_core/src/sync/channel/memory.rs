//! In-process channel log.
//!
//! Keeps every lane as an append-only vector and committed offsets per
//! consumer group, so a fresh consumer of the same group resumes after the
//! last commit and sees uncommitted deliveries again.

use super::{
    check_lane, ChannelConsumer, ChannelError, ChannelLog, ChannelProducer, ChannelRecord,
    Delivery, DeliveryAck, LANE_COUNT,
};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type LaneKey = (String, u8);

#[derive(Default)]
struct LogState {
    lanes: HashMap<LaneKey, Vec<ChannelRecord>>,
    committed: HashMap<(String, LaneKey), u64>,
    unavailable: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<LogState>,
    appended: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to an in-process log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates broker loss; sends, polls and subscribes fail while down.
    pub fn set_available(&self, available: bool) {
        self.shared.lock().unavailable = !available;
        self.shared.appended.notify_all();
    }

    /// Returns a copy of every record on one lane.
    pub fn records(&self, topic: &str, lane: u8) -> Vec<ChannelRecord> {
        self.shared
            .lock()
            .lanes
            .get(&(topic.to_string(), lane))
            .cloned()
            .unwrap_or_default()
    }

    /// Total records across all lanes of `topic`.
    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.shared.lock();
        (0..LANE_COUNT)
            .filter_map(|lane| state.lanes.get(&(topic.to_string(), lane)))
            .map(Vec::len)
            .sum()
    }

    pub fn committed_offset(&self, group: &str, topic: &str, lane: u8) -> u64 {
        self.shared
            .lock()
            .committed
            .get(&(group.to_string(), (topic.to_string(), lane)))
            .copied()
            .unwrap_or(0)
    }
}

impl ChannelProducer for MemoryLog {
    fn send(&self, record: ChannelRecord, _timeout: Duration) -> Result<DeliveryAck, ChannelError> {
        check_lane(record.lane)?;
        let mut state = self.shared.lock();
        if state.unavailable {
            return Err(ChannelError::Unavailable("memory log is down".to_string()));
        }

        let lane = state
            .lanes
            .entry((record.topic.clone(), record.lane))
            .or_default();
        let ack = DeliveryAck {
            topic: record.topic.clone(),
            lane: record.lane,
            offset: lane.len() as u64,
        };
        lane.push(record);
        drop(state);

        self.shared.appended.notify_all();
        Ok(ack)
    }
}

impl ChannelLog for MemoryLog {
    fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Box<dyn ChannelConsumer>, ChannelError> {
        if self.shared.lock().unavailable {
            return Err(ChannelError::Unavailable("memory log is down".to_string()));
        }
        Ok(Box::new(MemoryConsumer::new(self.clone(), group, topics)))
    }
}

/// Consumer-group member reading from a [`MemoryLog`].
pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    partitions: Vec<LaneKey>,
    positions: HashMap<LaneKey, u64>,
    next_partition: usize,
}

impl MemoryConsumer {
    fn new(log: MemoryLog, group: &str, topics: &[String]) -> Self {
        let partitions = topics
            .iter()
            .flat_map(|topic| (0..LANE_COUNT).map(move |lane| (topic.clone(), lane)))
            .collect();
        Self {
            log,
            group: group.to_string(),
            partitions,
            positions: HashMap::new(),
            next_partition: 0,
        }
    }

    /// Round-robins over lanes so one busy lane cannot starve the others.
    fn take_next(&mut self, state: &LogState) -> Option<Delivery> {
        let count = self.partitions.len();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let key = &self.partitions[index];
            let position = match self.positions.get(key) {
                Some(position) => *position,
                None => state
                    .committed
                    .get(&(self.group.clone(), key.clone()))
                    .copied()
                    .unwrap_or(0),
            };

            let Some(record) = state
                .lanes
                .get(key)
                .and_then(|lane| lane.get(position as usize))
            else {
                continue;
            };

            self.positions.insert(key.clone(), position + 1);
            self.next_partition = (index + 1) % count;
            return Some(Delivery {
                record: record.clone(),
                offset: position,
            });
        }
        None
    }
}

impl ChannelConsumer for MemoryConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.log.shared);
        let mut state = shared.lock();

        loop {
            if state.unavailable {
                return Err(ChannelError::Unavailable("memory log is down".to_string()));
            }
            if let Some(delivery) = self.take_next(&state) {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = shared
                .appended
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError> {
        let key = (
            self.group.clone(),
            (delivery.record.topic.clone(), delivery.record.lane),
        );
        let mut state = self.log.shared.lock();
        let committed = state.committed.entry(key).or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        debug!(
            "event=channel_commit module=channel status=ok group={} topic={} lane={} offset={}",
            self.group, delivery.record.topic, delivery.record.lane, delivery.offset
        );
        Ok(())
    }
}
