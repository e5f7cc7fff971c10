//! # Sync Task Table
//!
//! Owns the running sync pollers, at most one per trace key.
//!
//! ```text
//! ensure(key)  ──► spawn SyncPoller::run ──► loop ends on its own ──► SyncStopped{task_id}
//!                        ▲                                                 │
//! stop(key) ── cancel ───┘                            finished(key, id) ◄──┘
//! ```
//!
//! ## Rules
//! - The table lives inside the hub's worker; nothing else mutates it.
//! - Each spawned task gets a fresh `task_id`. A `SyncStopped` carrying an id
//!   that is no longer in the table (the key was stopped and restarted in the
//!   meantime) is ignored.
//! - A task that finished without reporting back (it panicked) counts as
//!   absent: it is not listed and the next `ensure` replaces it.
//! - Shutdown cancels every task, then joins each one with a bounded wait.
//!   A task that does not acknowledge in time is aborted and reported.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::command::{Command, WeakCommandSender};
use crate::core::registry::TraceKey;
use crate::core::sync_client::SyncClient;
use crate::ingestors::sync_polling::SyncPoller;

/// Why a poller loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncExit {
    /// The remote reported the trace as terminal.
    Terminal,
    /// Cancelled by unregistration of the last subscriber or by shutdown.
    Cancelled,
}

/// Handle to one running poller.
struct SyncTask {
    id: u64,
    join: JoinHandle<SyncExit>,
    cancel: CancellationToken,
}

/// Counters from [`SyncTaskSet::shutdown_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SyncShutdown {
    pub(crate) stopped: usize,
    pub(crate) failed: usize,
}

pub(crate) struct SyncTaskSet {
    client: Option<Arc<dyn SyncClient>>,
    poll_interval: Duration,
    call_timeout: Duration,
    tasks: HashMap<TraceKey, SyncTask>,
    next_id: u64,
}

impl SyncTaskSet {
    /// `client` is `None` when no remote is configured; every `ensure` is then a no-op.
    pub(crate) fn new(client: Option<Arc<dyn SyncClient>>, poll_interval: Duration, call_timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            call_timeout,
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Starts a poller for `key` unless one is already running.
    ///
    /// Returns `true` if a new task was spawned.
    pub(crate) fn ensure(&mut self, key: &TraceKey, commands: &WeakCommandSender) -> bool {
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        if let Some(task) = self.tasks.get(key) {
            if !task.join.is_finished() {
                return false;
            }
            warn!(trace_key = %key, task_id = task.id, "sync poller ended without reporting back, replacing it");
            self.tasks.remove(key);
        }

        let id = self.next_id;
        self.next_id += 1;

        let cancel = CancellationToken::new();
        let poller = SyncPoller::new(key.clone(), Arc::clone(client), self.poll_interval, self.call_timeout);
        let commands = commands.clone();
        let task_key = key.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let exit = poller.run(task_cancel).await;
            if let (SyncExit::Terminal, Some(commands)) = (exit, commands.upgrade()) {
                let _ = commands.send(Command::SyncStopped {
                    key: task_key,
                    task_id: id,
                    exit,
                });
            }
            exit
        });

        self.tasks.insert(key.clone(), SyncTask { id, join, cancel });
        debug!(trace_key = %key, task_id = id, "sync poller spawned");
        true
    }

    /// Cancels the poller of `key`, if any. The task unwinds on its own.
    pub(crate) fn stop(&mut self, key: &str) -> bool {
        match self.tasks.remove(key) {
            Some(task) => {
                task.cancel.cancel();
                debug!(trace_key = %key, task_id = task.id, "sync poller cancelled");
                true
            }
            None => false,
        }
    }

    /// Forgets a poller that ended by itself. Ignores stale ids.
    pub(crate) fn finished(&mut self, key: &TraceKey, task_id: u64) -> bool {
        match self.tasks.get(key) {
            Some(task) if task.id == task_id => {
                self.tasks.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Keys whose poller is still alive.
    pub(crate) fn keys(&self) -> BTreeSet<TraceKey> {
        self.tasks
            .iter()
            .filter(|(_, task)| !task.join.is_finished())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Cancels every poller, then waits up to `grace` for each to finish.
    pub(crate) async fn shutdown_all(&mut self, grace: Duration) -> SyncShutdown {
        let tasks: Vec<(TraceKey, SyncTask)> = self.tasks.drain().collect();
        let mut report = SyncShutdown::default();

        for (_, task) in &tasks {
            task.cancel.cancel();
        }

        for (key, task) in tasks {
            let abort = task.join.abort_handle();
            match timeout(grace, task.join).await {
                Ok(Ok(exit)) => {
                    debug!(trace_key = %key, ?exit, "sync poller stopped");
                    report.stopped += 1;
                }
                Ok(Err(join_err)) => {
                    error!(trace_key = %key, error = %join_err, "sync poller failed during shutdown");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(trace_key = %key, grace = ?grace, "sync poller ignored cancellation, aborting");
                    abort.abort();
                    report.failed += 1;
                }
            }
        }

        report
    }
}
