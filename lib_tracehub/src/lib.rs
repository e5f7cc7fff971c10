//! # lib_tracehub
//!
//! A trace change-notification hub. Transport connections subscribe to a
//! trace key and receive `file_updated` events; a file watcher signals
//! changes from any thread; bursts of changes are debounced per key; while a
//! key has subscribers, a background poller keeps asking a remote authority to
//! refresh it until the remote reports a terminal state.
//!
//! ## Modules
//! - **`core`**: the hub itself. Always compiled.
//! - **`ingestors`**: the remote sync polling loop. Always compiled.
//! - **`retrieve`** (feature `retrieve`): HTTP client and the HTTP `SyncClient`.
//! - **`configs`** (feature `configs`): layered settings from defaults, a JSON
//!   file, environment and CLI.
//! - **`loggers`** (feature `loggers`): `tracing` subscriber setup.
//!
//! ## Example
//! ```no_run
//! use lib_tracehub::core::{HubConfig, TraceHub};
//!
//! # async fn demo() {
//! let hub = TraceHub::new(HubConfig::default(), None);
//! hub.attach().expect("inside a tokio runtime");
//!
//! let mut subscriber = hub.register_connection("run-42");
//! hub.notifier().notify("run-42");
//!
//! if let Some(message) = subscriber.recv().await {
//!     println!("{}", message.to_json().unwrap_or_default());
//! }
//! hub.shutdown().await;
//! # }
//! ```

pub mod core;
pub mod ingestors;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use crate::core::{
    BroadcastMessage, HubConfig, HubError, Notifier, ShutdownReport, Subscriber, SubscriberId, SyncClient,
    SyncError, SyncOutcome, TraceEvent, TraceHub, TraceKey,
};
