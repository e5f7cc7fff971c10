//! # Data Retrieval Module
//!
//! HTTP plumbing towards the remote authority that owns trace state.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff and a per-request timeout.
//! - **`sync_http`**: The `SyncClient` implementation the hub uses to ask the
//!   remote to refresh a trace.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Remote trace refresh over HTTP.
pub mod sync_http;

pub use ky_http::{ApiClient, ApiError, ApiResponse};
pub use sync_http::HttpSyncClient;
