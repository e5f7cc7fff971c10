//! Thread-safe entry point for file watchers.
//!
//! Watchers usually run on their own OS threads, outside any tokio runtime.
//! [`Notifier::notify`] only pushes a command onto the hub's unbounded
//! channel, so it neither blocks nor needs a runtime context.

use std::sync::Arc;

use tracing::warn;

use crate::core::command::Command;
use crate::core::lifecycle::HubShared;
use crate::core::registry::TraceKey;

/// Cloneable change-signal handle obtained from [`TraceHub::notifier`](crate::core::TraceHub::notifier).
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<HubShared>,
}

impl Notifier {
    pub(crate) fn new(shared: Arc<HubShared>) -> Self {
        Self { shared }
    }

    /// Signals that the data behind `key` changed.
    ///
    /// Dropped with a warning while the hub is detached.
    pub fn notify(&self, key: impl Into<TraceKey>) {
        let key = key.into();
        if !self.shared.send(Command::Notify { key: key.clone() }) {
            warn!(trace_key = %key, "trace hub not attached, change notification dropped");
        }
    }

    /// Wraps this handle in a plain callback for watcher libraries that take
    /// `Fn(TraceKey)`.
    pub fn callback(&self) -> impl Fn(TraceKey) + Send + Sync + 'static {
        let notifier = self.clone();
        move |key| notifier.notify(key)
    }
}
