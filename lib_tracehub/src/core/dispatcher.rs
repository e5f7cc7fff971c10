//! # Non-blocking Broadcast Fan-out
//!
//! Takes one change event for a trace key and pushes it into every subscriber
//! channel registered under that key.
//!
//! ## Rules
//!
//! 1.  **Zero-Copy Fan-out**: the message is wrapped in an `Arc` once; each
//!     subscriber receives a pointer to the same allocation.
//! 2.  **Never Blocks**: delivery uses `try_send`. A full channel loses this
//!     message (logged as a drop); the next broadcast for the key supersedes
//!     it, so there is no retry.
//! 3.  **Isolation**: a full or closed channel does not affect delivery to the
//!     other subscribers of the same key.
//! 4.  **Snapshot Semantics**: only the slots passed in at call time are
//!     targeted; subscribers registered later do not receive this message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::core::registry::{SubscriberSlot, TraceKey};

/// Kind of event carried by a [`BroadcastMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    /// The trace's backing data changed.
    FileUpdated,
    /// Sent by the transport when a stream opens.
    Connected,
    /// Sent by the transport to keep idle streams alive.
    Heartbeat,
}

impl TraceEvent {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEvent::FileUpdated => "file_updated",
            TraceEvent::Connected => "connected",
            TraceEvent::Heartbeat => "heartbeat",
        }
    }
}

/// # Broadcast Message
///
/// The wire shape delivered through every subscriber channel:
/// `{"event": "...", "trace_key": "...", "timestamp": 1712345678.123456}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// What happened.
    pub event: TraceEvent,
    /// Trace the event refers to.
    pub trace_key: TraceKey,
    /// Seconds since the Unix epoch, microsecond precision.
    pub timestamp: f64,
}

impl BroadcastMessage {
    /// Builds a message stamped with the current wall-clock time.
    pub fn new(event: TraceEvent, trace_key: TraceKey) -> Self {
        Self {
            event,
            trace_key,
            timestamp: unix_timestamp(),
        }
    }

    /// A change notification, the only event the hub emits itself.
    pub fn file_updated(trace_key: TraceKey) -> Self {
        Self::new(TraceEvent::FileUpdated, trace_key)
    }

    /// Stream-opened event for the transport.
    pub fn connected(trace_key: TraceKey) -> Self {
        Self::new(TraceEvent::Connected, trace_key)
    }

    /// Keep-alive event for the transport.
    pub fn heartbeat(trace_key: TraceKey) -> Self {
        Self::new(TraceEvent::Heartbeat, trace_key)
    }

    /// Serializes to the JSON wire shape.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Outcome counters of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FanOutReport {
    pub(crate) delivered: usize,
    /// Dropped because the subscriber's channel was at capacity.
    pub(crate) dropped_full: usize,
    /// Dropped because the transport already released the receiver.
    pub(crate) dropped_closed: usize,
}

/// # Fan-out
///
/// Enqueues `message` into every slot without waiting. Never fails.
pub(crate) fn fan_out(message: Arc<BroadcastMessage>, slots: &[SubscriberSlot]) -> FanOutReport {
    let mut report = FanOutReport::default();

    for slot in slots {
        match slot.sender.try_send(Arc::clone(&message)) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                report.dropped_full += 1;
                warn!(
                    trace_key = %message.trace_key,
                    subscriber_id = %slot.id,
                    capacity = slot.capacity(),
                    event = message.event.as_str(),
                    "subscriber queue full, message dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                // The transport dropped its receiver but has not unregistered yet.
                report.dropped_closed += 1;
                debug!(
                    trace_key = %message.trace_key,
                    subscriber_id = %slot.id,
                    "subscriber receiver gone, message dropped"
                );
            }
        }
    }

    report
}

/// Builds a `file_updated` message for `key` and fans it out to `slots`.
pub(crate) fn broadcast_file_updated(key: &TraceKey, slots: &[SubscriberSlot]) -> FanOutReport {
    let message = Arc::new(BroadcastMessage::file_updated(key.clone()));
    let report = fan_out(message, slots);
    trace!(
        trace_key = %key,
        delivered = report.delivered,
        dropped = report.dropped_full + report.dropped_closed,
        "broadcast complete"
    );
    report
}
