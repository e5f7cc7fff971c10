//! # Remote Sync Contract
//!
//! The hub asks a remote authority to refresh a trace through this trait and
//! nothing else. The HTTP implementation lives in `retrieve::sync_http`;
//! tests plug in scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::registry::TraceKey;

/// Why a refresh call produced no usable answer.
///
/// None of these stop a poller; the loop logs them and tries again on the
/// next interval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The refresh URL could not be built from the base URL and key.
    #[error("sync endpoint could not be built: {0}")]
    InvalidEndpoint(String),

    /// The call did not finish within the configured timeout.
    #[error("sync call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-2xx status.
    #[error("sync endpoint answered {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text, empty if unreadable.
        body: String,
    },

    /// The 2xx body was not a JSON object of the expected shape.
    #[error("sync response could not be decoded: {0}")]
    Decode(String),
}

/// # Sync Outcome
///
/// Decoded body of a successful refresh call. Only `is_terminal` drives
/// behaviour; every other field is kept verbatim for logging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncOutcome {
    /// The trace will not change anymore; polling stops.
    #[serde(default)]
    pub is_terminal: bool,
    /// Every other field of the response.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncOutcome {
    /// An answer that ends polling.
    pub fn terminal() -> Self {
        Self {
            is_terminal: true,
            extra: Map::new(),
        }
    }

    /// An answer that keeps polling going.
    pub fn running() -> Self {
        Self::default()
    }

    /// Parses a response body. Anything other than a JSON object is rejected.
    pub fn from_json(body: &str) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_str(body).map_err(|e| SyncError::Decode(e.to_string()))?;
        Self::from_value(value)
    }

    /// Same as [`SyncOutcome::from_json`] for an already parsed body.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        if !value.is_object() {
            return Err(SyncError::Decode(format!("expected a JSON object, got {}", kind_of(&value))));
        }
        serde_json::from_value(value).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A remote authority able to refresh a trace on request.
#[async_trait]
pub trait SyncClient: Send + Sync + 'static {
    /// Asks the remote to refresh `key`. `force` bypasses any remote-side
    /// freshness check.
    async fn request_sync(&self, key: &TraceKey, force: bool) -> Result<SyncOutcome, SyncError>;
}
