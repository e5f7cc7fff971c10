//! # Core Engine Module
//!
//! The heart of the trace change-notification hub. A single owning worker
//! task keeps all mutable state; everything else talks to it through
//! commands.
//!
//! ## Core Components:
//!
//! - **`registry`**: Per-trace subscriber bookkeeping and the bounded channels
//!   handed to transport connections.
//!
//! - **`dispatcher`**: The broadcast message model and the non-blocking,
//!   zero-copy fan-out to every subscriber of a trace.
//!
//! - **`debounce`**: Per-trace cancellable timers that collapse bursts of
//!   change signals into one broadcast.
//!
//! - **`sync_tasks`**: The table of running remote sync pollers, one per
//!   trace at most.
//!
//! - **`lifecycle`**: [`TraceHub`] and its worker. Attach, shutdown and every
//!   public operation live here.
//!
//! - **`notifier`**: A thread-safe handle file watchers use to signal changes.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Commands accepted by the owning worker.
pub(crate) mod command;
/// Cancellable per-trace debounce timers.
pub(crate) mod debounce;
/// Broadcast messages and subscriber fan-out.
pub mod dispatcher;
/// The hub handle and its owning worker.
pub mod lifecycle;
/// Thread-safe change signalling.
pub mod notifier;
/// Per-trace subscriber registry.
pub mod registry;
/// The remote sync contract.
pub mod sync_client;
/// Running sync pollers.
pub(crate) mod sync_tasks;

// --- Public API Re-exports ---
pub use command::ShutdownReport;
pub use dispatcher::{BroadcastMessage, TraceEvent};
pub use lifecycle::{HubConfig, HubError, TraceHub};
pub use notifier::Notifier;
pub use registry::{ChannelDebug, ConnectionDebug, Subscriber, SubscriberId, TraceKey};
pub use sync_client::{SyncClient, SyncError, SyncOutcome};
pub use sync_tasks::SyncExit;
