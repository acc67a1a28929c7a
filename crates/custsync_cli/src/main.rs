//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `custsync_core` linkage (`ping`, `version`).
//! - Validate a configuration file before deployment (`check-config`).
//! - Run one local round trip against temporary stores (`demo`).

use custsync_core::{
    CustomerFields, Database, InMemoryDirectory, MemoryLog, Origin, RemoteDirectory, SyncConfig,
    SyncEngine,
};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "usage: custsync_cli [ping | check-config <path> | demo]";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None | Some("ping") => {
            println!("custsync_core ping={}", custsync_core::ping());
            println!("custsync_core version={}", custsync_core::core_version());
            Ok(())
        }
        Some("check-config") => match args.get(1) {
            Some(path) => check_config(path),
            None => Err(USAGE.into()),
        },
        Some("demo") => demo(),
        Some(_) => Err(USAGE.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: &str) -> Result<(), Box<dyn Error>> {
    let config = SyncConfig::from_file(path)?;
    println!(
        "config ok group={} topics={} poll_timeout_ms={} reconcile_interval_secs={}",
        config.consumer_group,
        config.topics.subscriptions().join(","),
        config.poll_timeout_ms,
        config.reconcile_interval_secs
    );
    Ok(())
}

/// Creates, updates and deletes one customer through both directions.
fn demo() -> Result<(), Box<dyn Error>> {
    let workdir = tempfile::tempdir()?;
    custsync_core::init_logging("info", workdir.path().join("logs"))?;
    let db = Database::new(workdir.path().join("customers.db"));
    db.connect()?;

    let log = MemoryLog::new();
    let remote = Arc::new(InMemoryDirectory::starting_at(100));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        db,
        Arc::new(log.clone()),
        remote.clone(),
    );
    let mut consumer = engine.subscribe(&log)?;
    let drain_timeout = Duration::from_millis(50);

    let customer = engine.customers().create_customer(
        CustomerFields::new("Demo Customer", "demo@example.com"),
        Origin::Local,
    )?;
    engine.dispatcher().drain(consumer.as_mut(), drain_timeout)?;
    println!(
        "created local_id={} remote_records={}",
        customer.local_id,
        remote.snapshot().len()
    );

    let external_id = remote
        .snapshot()
        .first()
        .map(|record| record.id.clone())
        .ok_or("remote create was not applied")?;
    // Stand in for a remote user editing the record, then notifying us.
    remote.update(
        &external_id,
        &CustomerFields::new("Demo Renamed", "demo@example.com"),
    )?;
    let webhook = serde_json::json!({
        "type": "customer.updated",
        "data": { "object": { "id": external_id, "name": "Demo Renamed", "email": "demo@example.com" } }
    });
    engine.webhooks().ingest(webhook.to_string().as_bytes())?;
    engine.dispatcher().drain(consumer.as_mut(), drain_timeout)?;

    let report = engine.poller().run_once()?;
    println!(
        "reconciled remote_records={} emitted={}",
        report.remote_records,
        report.emitted()
    );

    engine
        .customers()
        .delete_customer(customer.local_id, Origin::Local)?;
    engine.dispatcher().drain(consumer.as_mut(), drain_timeout)?;
    println!(
        "deleted local_id={} remote_records={}",
        customer.local_id,
        remote.snapshot().len()
    );
    log::info!("event=demo_run module=cli status=ok local_id={}", customer.local_id);
    Ok(())
}
