use custsync_core::sync::channel::{
    ChannelConsumer, ChannelError, ChannelLog, ChannelProducer, ChannelRecord, MemoryLog,
    SqliteLog,
};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(50);
const SEND: Duration = Duration::from_secs(1);

fn record(topic: &str, lane: u8, key: &str) -> ChannelRecord {
    ChannelRecord {
        topic: topic.to_string(),
        lane,
        key: Some(key.to_string()),
        value: key.as_bytes().to_vec(),
    }
}

fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn drain_keys(consumer: &mut dyn ChannelConsumer, commit: bool) -> Vec<String> {
    let mut keys = Vec::new();
    while let Some(delivery) = consumer.poll(POLL).unwrap() {
        keys.push(delivery.record.key.clone().unwrap());
        if commit {
            consumer.commit(&delivery).unwrap();
        }
    }
    keys
}

fn lane_is_fifo(log: &dyn ChannelLog) {
    for key in ["a", "b", "c"] {
        log.send(record("to-remote", 1, key), SEND).unwrap();
    }
    let mut consumer = log.subscribe("g", &topics(&["to-remote"])).unwrap();
    assert_eq!(drain_keys(consumer.as_mut(), true), vec!["a", "b", "c"]);
}

fn uncommitted_deliveries_are_redelivered(log: &dyn ChannelLog) {
    log.send(record("to-local", 0, "first"), SEND).unwrap();
    log.send(record("to-local", 0, "second"), SEND).unwrap();

    let mut consumer = log.subscribe("g", &topics(&["to-local"])).unwrap();
    let first = consumer.poll(POLL).unwrap().unwrap();
    consumer.commit(&first).unwrap();
    let second = consumer.poll(POLL).unwrap().unwrap();
    assert_eq!(second.record.key.as_deref(), Some("second"));
    drop(consumer);

    let mut resumed = log.subscribe("g", &topics(&["to-local"])).unwrap();
    assert_eq!(drain_keys(resumed.as_mut(), true), vec!["second"]);

    let mut other_group = log.subscribe("other", &topics(&["to-local"])).unwrap();
    assert_eq!(drain_keys(other_group.as_mut(), false), vec!["first", "second"]);
}

fn offsets_are_dense_per_lane(log: &dyn ChannelLog) {
    let a = log.send(record("t", 0, "a"), SEND).unwrap();
    let b = log.send(record("t", 2, "b"), SEND).unwrap();
    let c = log.send(record("t", 0, "c"), SEND).unwrap();
    assert_eq!((a.offset, b.offset, c.offset), (0, 0, 1));
    assert_eq!(b.lane, 2);
}

fn unsubscribed_topics_are_not_delivered(log: &dyn ChannelLog) {
    log.send(record("to-remote", 0, "remote"), SEND).unwrap();
    log.send(record("to-local", 0, "local"), SEND).unwrap();
    let mut consumer = log.subscribe("g", &topics(&["to-local"])).unwrap();
    assert_eq!(drain_keys(consumer.as_mut(), true), vec!["local"]);
}

fn lanes_outside_range_are_rejected(log: &dyn ChannelLog) {
    let err = log.send(record("t", 3, "x"), SEND).unwrap_err();
    assert!(matches!(err, ChannelError::InvalidLane(3)));
}

fn sqlite_log() -> (tempfile::TempDir, SqliteLog) {
    let dir = tempfile::tempdir().unwrap();
    let log = SqliteLog::open(dir.path().join("channel.db")).unwrap();
    (dir, log)
}

#[test]
fn memory_lane_is_fifo() {
    lane_is_fifo(&MemoryLog::new());
}

#[test]
fn sqlite_lane_is_fifo() {
    let (_dir, log) = sqlite_log();
    lane_is_fifo(&log);
}

#[test]
fn memory_redelivers_uncommitted() {
    uncommitted_deliveries_are_redelivered(&MemoryLog::new());
}

#[test]
fn sqlite_redelivers_uncommitted() {
    let (_dir, log) = sqlite_log();
    uncommitted_deliveries_are_redelivered(&log);
}

#[test]
fn memory_offsets_are_dense_per_lane() {
    offsets_are_dense_per_lane(&MemoryLog::new());
}

#[test]
fn sqlite_offsets_are_dense_per_lane() {
    let (_dir, log) = sqlite_log();
    offsets_are_dense_per_lane(&log);
}

#[test]
fn memory_ignores_unsubscribed_topics() {
    unsubscribed_topics_are_not_delivered(&MemoryLog::new());
}

#[test]
fn sqlite_ignores_unsubscribed_topics() {
    let (_dir, log) = sqlite_log();
    unsubscribed_topics_are_not_delivered(&log);
}

#[test]
fn both_backends_reject_unknown_lanes() {
    lanes_outside_range_are_rejected(&MemoryLog::new());
    let (_dir, log) = sqlite_log();
    lanes_outside_range_are_rejected(&log);
}

#[test]
fn sqlite_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channel.db");
    {
        let log = SqliteLog::open(&path).unwrap();
        log.send(record("to-remote", 0, "durable"), SEND).unwrap();
        let mut consumer = log.subscribe("g", &topics(&["to-remote"])).unwrap();
        let delivery = consumer.poll(POLL).unwrap().unwrap();
        assert_eq!(delivery.record.key.as_deref(), Some("durable"));
    }

    let reopened = SqliteLog::open(&path).unwrap();
    let mut consumer = reopened.subscribe("g", &topics(&["to-remote"])).unwrap();
    assert_eq!(drain_keys(consumer.as_mut(), true), vec!["durable"]);

    let mut after_commit = reopened.subscribe("g", &topics(&["to-remote"])).unwrap();
    assert!(after_commit.poll(POLL).unwrap().is_none());
}

#[test]
fn memory_log_outage_fails_send_subscribe_and_poll() {
    let log = MemoryLog::new();
    let mut consumer = log.subscribe("g", &topics(&["to-remote"])).unwrap();
    log.set_available(false);

    assert!(matches!(
        log.send(record("to-remote", 0, "x"), SEND),
        Err(ChannelError::Unavailable(_))
    ));
    assert!(log.subscribe("g", &topics(&["to-remote"])).is_err());
    assert!(consumer.poll(POLL).is_err());

    log.set_available(true);
    log.send(record("to-remote", 0, "x"), SEND).unwrap();
    assert!(consumer.poll(POLL).unwrap().is_some());
    assert_eq!(log.committed_offset("g", "to-remote", 0), 0);
}
