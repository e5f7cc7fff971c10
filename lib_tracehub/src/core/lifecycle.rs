//! # Trace Hub Lifecycle
//!
//! [`TraceHub`] is the handle the transport layer and the file watcher share.
//! Behind it runs one owning worker task ([`HubWorker`]) that holds every
//! piece of mutable state: the subscriber registry, the debounce timers and
//! the sync poller table.
//!
//! ## Lifecycle
//! ```text
//! TraceHub::new ──► attach() ──► [worker running] ──► shutdown()
//!                       │                                  │
//!                       └── spawns HubWorker::run          ├─ cancel debounce timers (no firing)
//!                                                          ├─ cancel + join sync pollers (bounded)
//!                                                          ├─ release subscriber channels
//!                                                          └─ detach
//! ```
//!
//! ## Rules
//! - Every public operation is a command on one unbounded channel; the worker
//!   applies them in send order, so a query issued after an unregister always
//!   observes it.
//! - Sending never blocks, so `notify` is safe from any OS thread.
//! - With nothing attached, commands are dropped and logged. Registration
//!   still returns a subscriber, but its stream ends immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::core::command::{Command, CommandReceiver, CommandSender, Query, ShutdownReport, WeakCommandSender};
use crate::core::debounce::DebounceScheduler;
use crate::core::dispatcher::broadcast_file_updated;
use crate::core::notifier::Notifier;
use crate::core::registry::{
    subscriber_channel, ConnectionDebug, Removal, Subscriber, SubscriberId, SubscriberRegistry, TraceKey,
};
use crate::core::sync_client::{SyncClient, SyncError, SyncOutcome};
use crate::core::sync_tasks::SyncTaskSet;
use crate::ingestors::sync_polling::request_with_timeout;

/// Errors raised while attaching the hub to a runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// `attach` called while a worker is already running.
    #[error("trace hub is already attached to a running worker")]
    AlreadyAttached,

    /// `attach` called outside a tokio runtime.
    #[error("no tokio runtime available to run the trace hub worker")]
    NoRuntime,
}

/// # Hub Configuration
///
/// Timing and sizing knobs of the hub itself. Remote endpoint settings belong
/// to the [`SyncClient`] implementation handed to [`TraceHub::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Quiet period after the last change signal before a broadcast fires.
    pub debounce_window: Duration,
    /// Capacity of each subscriber channel.
    pub subscriber_capacity: usize,
    /// Sleep between two refresh calls of one sync poller.
    pub poll_interval: Duration,
    /// Upper bound of a single refresh call.
    pub sync_timeout: Duration,
    /// Per-poller wait during shutdown before it is aborted.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            subscriber_capacity: 100,
            poll_interval: Duration::from_secs(2),
            sync_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The owning worker's command sender plus its task handle.
struct Attachment {
    commands: CommandSender,
    worker: JoinHandle<()>,
}

pub(crate) struct HubShared {
    config: HubConfig,
    sync_client: Option<Arc<dyn SyncClient>>,
    attachment: Mutex<Option<Attachment>>,
    next_subscriber: AtomicU64,
}

impl HubShared {
    fn attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands `command` to the worker. Returns `false` when nothing is attached.
    pub(crate) fn send(&self, command: Command) -> bool {
        match self.attachment().as_ref() {
            Some(attachment) => attachment.commands.send(command).is_ok(),
            None => false,
        }
    }
}

/// # Trace Hub
///
/// Cheap to clone; all clones talk to the same worker.
#[derive(Clone)]
pub struct TraceHub {
    shared: Arc<HubShared>,
}

impl TraceHub {
    /// Creates a detached hub. Pass `None` as `sync_client` to disable remote
    /// polling entirely.
    pub fn new(config: HubConfig, sync_client: Option<Arc<dyn SyncClient>>) -> Self {
        Self {
            shared: Arc::new(HubShared {
                config,
                sync_client,
                attachment: Mutex::new(None),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Settings the hub was built with.
    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// True when remote polling is configured.
    pub fn sync_enabled(&self) -> bool {
        self.shared.sync_client.is_some()
    }

    /// Spawns the owning worker on the current tokio runtime.
    ///
    /// A hub that was shut down can be attached again; it starts from empty
    /// state.
    pub fn attach(&self) -> Result<(), HubError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let mut slot = self.shared.attachment();

        if let Some(existing) = slot.as_ref() {
            if !existing.commands.is_closed() {
                return Err(HubError::AlreadyAttached);
            }
        }

        let (commands, inbox) = mpsc::unbounded_channel();
        let worker = HubWorker::new(
            self.shared.config.clone(),
            self.shared.sync_client.clone(),
            commands.downgrade(),
            inbox,
        );
        // The worker logs under the span of whoever attached it.
        let worker = runtime.spawn(worker.run().in_current_span());
        *slot = Some(Attachment { commands, worker });

        info!(
            debounce = ?self.shared.config.debounce_window,
            capacity = self.shared.config.subscriber_capacity,
            sync_enabled = self.shared.sync_client.is_some(),
            "trace hub attached"
        );
        Ok(())
    }

    /// True while a worker is running.
    pub fn is_attached(&self) -> bool {
        self.shared
            .attachment()
            .as_ref()
            .is_some_and(|attachment| !attachment.commands.is_closed())
    }

    /// A thread-safe handle for change watchers.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(Arc::clone(&self.shared))
    }

    /// Signals that `key`'s backing data changed. Never blocks.
    pub fn notify(&self, key: impl Into<TraceKey>) {
        self.notifier().notify(key);
    }

    /// # Register Connection
    ///
    /// Creates a bounded subscriber channel for `key`. The first subscriber
    /// of a key also starts its sync poller.
    pub fn register_connection(&self, key: impl Into<TraceKey>) -> Subscriber {
        let key = key.into();
        let id = SubscriberId(self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let (slot, subscriber) = subscriber_channel(id, key.clone(), self.shared.config.subscriber_capacity);

        if !self.shared.send(Command::Register { key: key.clone(), slot }) {
            warn!(trace_key = %key, subscriber_id = %id, "trace hub not attached, subscriber stream closed");
        }
        subscriber
    }

    /// Removes subscriber `id` from `key`. Unknown ids are ignored.
    pub fn unregister_connection(&self, key: impl Into<TraceKey>, id: SubscriberId) {
        let key = key.into();
        if !self.shared.send(Command::Unregister { key: key.clone(), id }) {
            debug!(trace_key = %key, subscriber_id = %id, "trace hub not attached, nothing to unregister");
        }
    }

    /// Makes sure a sync poller runs for `key`. No-op without a remote or
    /// without subscribers.
    pub fn ensure_sync_polling(&self, key: impl Into<TraceKey>) {
        if !self.sync_enabled() {
            return;
        }
        let key = key.into();
        if !self.shared.send(Command::EnsureSync { key: key.clone() }) {
            debug!(trace_key = %key, "trace hub not attached, sync polling not started");
        }
    }

    /// # Request Sync Once
    ///
    /// One refresh call outside any poller. `Ok(None)` when no remote is
    /// configured.
    pub async fn request_sync_once(
        &self,
        key: impl Into<TraceKey>,
        force: bool,
    ) -> Result<Option<SyncOutcome>, SyncError> {
        let Some(client) = self.shared.sync_client.as_ref() else {
            return Ok(None);
        };
        let key = key.into();

        match request_with_timeout(client.as_ref(), &key, force, self.shared.config.sync_timeout).await {
            Ok(outcome) => {
                debug!(trace_key = %key, force, terminal = outcome.is_terminal, "one-off sync done");
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!(trace_key = %key, force, error = %e, "one-off sync failed");
                Err(e)
            }
        }
    }

    /// Subscribers currently registered for `key`.
    pub async fn connection_count(&self, key: impl Into<TraceKey>) -> usize {
        let key = key.into();
        self.query(|reply| Query::ConnectionCount { key, reply }).await
    }

    /// Keys with at least one subscriber.
    pub async fn active_keys(&self) -> BTreeSet<TraceKey> {
        self.query(|reply| Query::ActiveKeys { reply }).await
    }

    /// Per-key subscriber counts with each channel's current occupancy.
    pub async fn connection_debug_snapshot(&self) -> BTreeMap<TraceKey, ConnectionDebug> {
        self.query(|reply| Query::DebugSnapshot { reply }).await
    }

    /// Keys with a debounce timer waiting to fire.
    pub async fn pending_broadcast_traces(&self) -> BTreeSet<TraceKey> {
        self.query(|reply| Query::PendingBroadcasts { reply }).await
    }

    /// Keys with a running sync poller.
    pub async fn sync_polling_traces(&self) -> BTreeSet<TraceKey> {
        self.query(|reply| Query::SyncTraces { reply }).await
    }

    async fn query<T: Default>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> T {
        let (reply, answer) = oneshot::channel();
        if !self.shared.send(Command::Query(build(reply))) {
            return T::default();
        }
        answer.await.unwrap_or_default()
    }

    /// # Shutdown
    ///
    /// Detaches first, so notifications arriving meanwhile are dropped, then
    /// lets the worker cancel and clean up everything it owns.
    pub async fn shutdown(&self) -> ShutdownReport {
        let attachment = self.shared.attachment().take();
        let Some(Attachment { commands, worker }) = attachment else {
            debug!("trace hub shutdown requested while detached");
            return ShutdownReport::default();
        };

        let (done, report) = oneshot::channel();
        let report = if commands.send(Command::Shutdown { done }).is_ok() {
            report.await.unwrap_or_default()
        } else {
            ShutdownReport::default()
        };
        drop(commands);

        if let Err(e) = worker.await {
            error!(error = %e, "trace hub worker ended abnormally");
        }

        info!(
            cancelled_broadcasts = report.cancelled_broadcasts,
            stopped_sync_tasks = report.stopped_sync_tasks,
            failed_sync_tasks = report.failed_sync_tasks,
            released_subscribers = report.released_subscribers,
            "trace hub shut down"
        );
        report
    }
}

/// # Hub Worker
///
/// The single owner of hub state. Runs until it receives `Shutdown` or every
/// strong command sender is gone.
struct HubWorker {
    config: HubConfig,
    registry: SubscriberRegistry,
    debounce: DebounceScheduler,
    sync: SyncTaskSet,
    commands: WeakCommandSender,
    inbox: CommandReceiver,
}

impl HubWorker {
    fn new(
        config: HubConfig,
        sync_client: Option<Arc<dyn SyncClient>>,
        commands: WeakCommandSender,
        inbox: CommandReceiver,
    ) -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            debounce: DebounceScheduler::new(config.debounce_window),
            sync: SyncTaskSet::new(sync_client, config.poll_interval, config.sync_timeout),
            config,
            commands,
            inbox,
        }
    }

    async fn run(mut self) {
        debug!("trace hub worker started");

        while let Some(command) = self.inbox.recv().await {
            if let ControlFlow::Break(done) = self.handle(command) {
                let report = self.cleanup().await;
                let _ = done.send(report);
                debug!("trace hub worker stopped");
                return;
            }
        }

        // Every handle was dropped without an explicit shutdown.
        let report = self.cleanup().await;
        info!(
            cancelled_broadcasts = report.cancelled_broadcasts,
            stopped_sync_tasks = report.stopped_sync_tasks,
            failed_sync_tasks = report.failed_sync_tasks,
            released_subscribers = report.released_subscribers,
            "trace hub shut down after its handles were dropped"
        );
    }

    /// Applies one command. Breaks with the reply channel on `Shutdown`.
    fn handle(&mut self, command: Command) -> ControlFlow<oneshot::Sender<ShutdownReport>> {
        match command {
            Command::Register { key, slot } => {
                let id = slot.id;
                let first = self.registry.insert(key.clone(), slot);
                debug!(trace_key = %key, subscriber_id = %id, count = self.registry.count(key.as_str()), "subscriber registered");
                if first {
                    self.start_sync(&key);
                }
            }
            Command::Unregister { key, id } => match self.registry.remove(key.as_str(), id) {
                Removal::NotFound => {
                    trace!(trace_key = %key, subscriber_id = %id, "unregister ignored, subscriber unknown");
                }
                Removal::Removed => {
                    debug!(trace_key = %key, subscriber_id = %id, count = self.registry.count(key.as_str()), "subscriber unregistered");
                }
                Removal::LastRemoved => {
                    debug!(trace_key = %key, subscriber_id = %id, "last subscriber unregistered");
                    self.sync.stop(key.as_str());
                }
            },
            Command::Notify { key } => {
                let replaced = self.debounce.schedule(&key, &self.commands);
                trace!(trace_key = %key, replaced, "change notification scheduled");
            }
            Command::DebounceElapsed { key, generation } => {
                if self.debounce.take_elapsed(&key, generation) {
                    let report = broadcast_file_updated(&key, self.registry.slots(key.as_str()));
                    debug!(
                        trace_key = %key,
                        delivered = report.delivered,
                        dropped_full = report.dropped_full,
                        dropped_closed = report.dropped_closed,
                        "file_updated broadcast"
                    );
                }
            }
            Command::EnsureSync { key } => {
                if self.registry.contains(key.as_str()) {
                    self.start_sync(&key);
                } else {
                    debug!(trace_key = %key, "no subscribers, sync polling not started");
                }
            }
            Command::SyncStopped { key, task_id, exit } => {
                if self.sync.finished(&key, task_id) {
                    debug!(trace_key = %key, task_id, ?exit, "sync poller removed");
                }
            }
            Command::Query(query) => self.answer(query),
            Command::Shutdown { done } => return ControlFlow::Break(done),
        }
        ControlFlow::Continue(())
    }

    fn start_sync(&mut self, key: &TraceKey) {
        if !self.sync.enabled() {
            return;
        }
        if self.sync.ensure(key, &self.commands) {
            info!(trace_key = %key, interval = ?self.config.poll_interval, "sync polling started");
        }
    }

    fn answer(&self, query: Query) {
        // A dropped reply receiver only means the caller stopped waiting.
        match query {
            Query::ConnectionCount { key, reply } => {
                let _ = reply.send(self.registry.count(key.as_str()));
            }
            Query::ActiveKeys { reply } => {
                let _ = reply.send(self.registry.keys());
            }
            Query::DebugSnapshot { reply } => {
                let _ = reply.send(self.registry.debug_snapshot());
            }
            Query::PendingBroadcasts { reply } => {
                let _ = reply.send(self.debounce.pending_keys());
            }
            Query::SyncTraces { reply } => {
                let _ = reply.send(self.sync.keys());
            }
        }
    }

    async fn cleanup(&mut self) -> ShutdownReport {
        let cancelled_broadcasts = self.debounce.cancel_all();
        let sync = self.sync.shutdown_all(self.config.shutdown_grace).await;
        let released_subscribers = self.registry.clear();

        ShutdownReport {
            cancelled_broadcasts,
            stopped_sync_tasks: sync.stopped,
            failed_sync_tasks: sync.failed,
            released_subscribers,
        }
    }
}
