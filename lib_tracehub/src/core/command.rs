//! Messages accepted by the hub's owning worker.
//!
//! Every mutation of hub state and every state query travels through this one
//! channel, so the worker observes them in send order.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::{mpsc, oneshot};

use crate::core::registry::{ConnectionDebug, SubscriberId, SubscriberSlot, TraceKey};
use crate::core::sync_tasks::SyncExit;

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<Command>;
/// Handed to timers and pollers so they never keep the worker alive on their own.
pub(crate) type WeakCommandSender = mpsc::WeakUnboundedSender<Command>;

#[derive(Debug)]
pub(crate) enum Command {
    Register {
        key: TraceKey,
        slot: SubscriberSlot,
    },
    Unregister {
        key: TraceKey,
        id: SubscriberId,
    },
    Notify {
        key: TraceKey,
    },
    /// Fired by a debounce timer once its quiet window elapsed.
    DebounceElapsed {
        key: TraceKey,
        generation: u64,
    },
    EnsureSync {
        key: TraceKey,
    },
    /// Sent by a sync poller when its loop ends on its own.
    SyncStopped {
        key: TraceKey,
        task_id: u64,
        exit: SyncExit,
    },
    Query(Query),
    Shutdown {
        done: oneshot::Sender<ShutdownReport>,
    },
}

#[derive(Debug)]
pub(crate) enum Query {
    ConnectionCount {
        key: TraceKey,
        reply: oneshot::Sender<usize>,
    },
    ActiveKeys {
        reply: oneshot::Sender<BTreeSet<TraceKey>>,
    },
    DebugSnapshot {
        reply: oneshot::Sender<BTreeMap<TraceKey, ConnectionDebug>>,
    },
    PendingBroadcasts {
        reply: oneshot::Sender<BTreeSet<TraceKey>>,
    },
    SyncTraces {
        reply: oneshot::Sender<BTreeSet<TraceKey>>,
    },
}

/// What a hub shutdown cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Debounce timers cancelled without firing.
    pub cancelled_broadcasts: usize,
    /// Sync pollers that acknowledged cancellation in time.
    pub stopped_sync_tasks: usize,
    /// Sync pollers that panicked or had to be aborted.
    pub failed_sync_tasks: usize,
    /// Subscriber channels released.
    pub released_subscribers: usize,
}
