//! # Logging
//!
//! `tracing` subscriber installation and log file housekeeping.

/// Subscriber setup and old log cleanup.
pub mod tracing_setup;

pub use tracing_setup::{cleanup_old_logs, init_tracing};
