//! # Data Ingestors Module
//!
//! Background loops that pull fresh state from outside the process.
//!
//! ## Contained Modules:
//! - **`sync_polling`**: A self-scheduling loop that keeps asking the remote
//!   authority to refresh one trace until it reports a terminal state.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The self-scheduling remote sync loop.
pub mod sync_polling;

pub use sync_polling::SyncPoller;
