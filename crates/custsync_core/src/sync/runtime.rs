//! Engine wiring and background threads.
//!
//! # Responsibility
//! - Build every sync component from one configuration and one set of
//!   injected collaborators (store, channel producer, remote directory).
//! - Run the dispatcher loop and the reconciliation timer on their own
//!   threads until shutdown.
//!
//! # Invariants
//! - Failing to subscribe to the channel at startup is fatal; no thread is
//!   spawned in that case.
//! - `shutdown` stops both threads and joins them before returning.

use crate::config::SyncConfig;
use crate::db::Database;
use crate::service::customer_service::CustomerService;
use crate::sync::channel::{ChannelConsumer, ChannelLog, ChannelProducer};
use crate::sync::dispatcher::{DispatchCounts, DispatchStats, Dispatcher};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::publisher::{ChangePublisher, EnvelopePublisher};
use crate::sync::reconcile::ReconciliationPoller;
use crate::sync::remote::RemoteDirectory;
use crate::sync::webhook::WebhookIngestor;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cooperative stop flag shared by the background loops.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// Sleeps up to `timeout`, waking early on trigger. Returns whether the
    /// signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(self.flag(), timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// All sync components, wired against shared collaborators.
#[derive(Clone)]
pub struct SyncEngine {
    config: SyncConfig,
    customers: CustomerService,
    webhooks: WebhookIngestor,
    poller: ReconciliationPoller,
    dispatcher: Dispatcher,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        db: Database,
        producer: Arc<dyn ChannelProducer>,
        remote: Arc<dyn RemoteDirectory>,
    ) -> Self {
        let publisher =
            EnvelopePublisher::new(producer, config.topics.clone(), config.publish_timeout());
        let customers = CustomerService::new(db.clone(), ChangePublisher::new(publisher.clone()));
        let webhooks = WebhookIngestor::new(publisher.clone());
        let poller = ReconciliationPoller::new(db.clone(), Arc::clone(&remote), publisher);
        let dispatcher = Dispatcher::new(db, remote, customers.clone(), config.topics.clone());

        Self {
            config,
            customers,
            webhooks,
            poller,
            dispatcher,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Local mutation entry point.
    pub fn customers(&self) -> &CustomerService {
        &self.customers
    }

    pub fn webhooks(&self) -> &WebhookIngestor {
        &self.webhooks
    }

    pub fn poller(&self) -> &ReconciliationPoller {
        &self.poller
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Joins the configured consumer group on every configured topic.
    pub fn subscribe(&self, log: &dyn ChannelLog) -> SyncResult<Box<dyn ChannelConsumer>> {
        let topics = self.config.topics.subscriptions();
        log.subscribe(&self.config.consumer_group, &topics)
            .map_err(|err| {
                error!(
                    "event=channel_subscribe module=runtime status=error group={} topics={} error={}",
                    self.config.consumer_group,
                    topics.join(","),
                    err
                );
                SyncError::Transport(err)
            })
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    /// The channel could not be opened for consumption.
    Subscribe(SyncError),
    Spawn(std::io::Error),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe(err) => write!(f, "cannot subscribe to channel: {err}"),
            Self::Spawn(err) => write!(f, "cannot spawn worker thread: {err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Subscribe(err) => Some(err),
            Self::Spawn(err) => Some(err),
        }
    }
}

/// What the background threads did before stopping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSummary {
    pub dispatch: DispatchCounts,
    pub reconcile_passes: usize,
}

pub struct SyncRuntime;

impl SyncRuntime {
    /// Subscribes to `log` and starts the dispatcher and reconciliation
    /// threads.
    pub fn start(engine: &SyncEngine, log: &dyn ChannelLog) -> Result<SyncRuntimeHandle, RuntimeError> {
        let mut consumer = engine.subscribe(log).map_err(RuntimeError::Subscribe)?;
        let shutdown = ShutdownSignal::new();
        let config = engine.config();

        let dispatcher = engine.dispatcher().clone();
        let stats = dispatcher.stats();
        let poll_timeout = config.poll_timeout();
        let dispatch_signal = shutdown.clone();
        let dispatcher_thread = thread::Builder::new()
            .name("custsync-dispatcher".to_string())
            .spawn(move || dispatcher.run(consumer.as_mut(), poll_timeout, &dispatch_signal))
            .map_err(RuntimeError::Spawn)?;

        let poller = engine.poller().clone();
        let interval = config.reconcile_interval();
        let reconcile_signal = shutdown.clone();
        let reconcile_thread = match thread::Builder::new()
            .name("custsync-reconcile".to_string())
            .spawn(move || poller.run_every(interval, &reconcile_signal))
        {
            Ok(handle) => handle,
            Err(err) => {
                shutdown.trigger();
                let _ = dispatcher_thread.join();
                return Err(RuntimeError::Spawn(err));
            }
        };

        info!(
            "event=runtime_start module=runtime status=ok group={} poll_timeout_ms={} reconcile_interval_secs={}",
            config.consumer_group, config.poll_timeout_ms, config.reconcile_interval_secs
        );
        Ok(SyncRuntimeHandle {
            shutdown,
            stats,
            dispatcher: Some(dispatcher_thread),
            reconcile: Some(reconcile_thread),
        })
    }
}

/// Owner of the running background threads.
pub struct SyncRuntimeHandle {
    shutdown: ShutdownSignal,
    stats: Arc<DispatchStats>,
    dispatcher: Option<JoinHandle<DispatchCounts>>,
    reconcile: Option<JoinHandle<usize>>,
}

impl SyncRuntimeHandle {
    /// Live dispatcher counters.
    pub fn stats(&self) -> DispatchCounts {
        self.stats.snapshot()
    }

    /// Stops both threads and waits for them.
    pub fn shutdown(mut self) -> RuntimeSummary {
        self.stop()
    }

    fn stop(&mut self) -> RuntimeSummary {
        self.shutdown.trigger();
        let mut summary = RuntimeSummary::default();

        if let Some(handle) = self.dispatcher.take() {
            match handle.join() {
                Ok(counts) => summary.dispatch = counts,
                Err(_) => {
                    error!("event=runtime_stop module=runtime status=error thread=dispatcher reason=panicked");
                    summary.dispatch = self.stats.snapshot();
                }
            }
        }
        if let Some(handle) = self.reconcile.take() {
            match handle.join() {
                Ok(passes) => summary.reconcile_passes = passes,
                Err(_) => {
                    error!("event=runtime_stop module=runtime status=error thread=reconcile reason=panicked")
                }
            }
        }

        info!(
            "event=runtime_stop module=runtime status=ok received={} reconcile_passes={}",
            summary.dispatch.received, summary.reconcile_passes
        );
        summary
    }
}

impl Drop for SyncRuntimeHandle {
    fn drop(&mut self) {
        if self.dispatcher.is_some() || self.reconcile.is_some() {
            self.stop();
        }
    }
}
