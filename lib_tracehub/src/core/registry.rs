//! # Subscriber Registry
//!
//! Tracks, per trace key, the set of listener channels currently attached to
//! the hub. The registry is a plain owned structure: it lives inside the hub's
//! owning worker and is only ever touched from there, so it carries no locks.
//!
//! Each registration produces two halves of one bounded channel:
//!
//! - a `SubscriberSlot` (sending half) kept here for fan-out, and
//! - a [`Subscriber`] (receiving half) handed to the transport layer.
//!
//! Removing a slot drops the registry's sender. The transport sees the channel
//! end once it has drained whatever was already queued.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::dispatcher::BroadcastMessage;

/// # Trace Key
///
/// Opaque name of a trace stream. The hub never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceKey(String);

impl TraceKey {
    /// Wraps any string-like value as a trace key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrows the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TraceKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TraceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&TraceKey> for TraceKey {
    fn from(value: &TraceKey) -> Self {
        value.clone()
    }
}

impl Borrow<str> for TraceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Process-unique identifier of one subscriber channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// # Subscriber
///
/// The consuming half of a listener channel, owned by the transport layer.
///
/// Messages arrive as `Arc<BroadcastMessage>` so a fan-out to many listeners
/// shares one allocation. Once the registry drops its slot (unregistration or
/// hub shutdown) `recv` drains the remaining queue and then yields `None`.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    key: TraceKey,
    receiver: mpsc::Receiver<Arc<BroadcastMessage>>,
}

impl Subscriber {
    /// Identifier to pass back on unregistration.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Trace key this subscriber listens to.
    pub fn key(&self) -> &TraceKey {
        &self.key
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastMessage>> {
        self.receiver.recv().await
    }

    /// Takes the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BroadcastMessage>> {
        self.receiver.try_recv().ok()
    }

    /// Number of messages waiting in the channel.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True when no message is waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Fixed capacity of the channel.
    pub fn capacity(&self) -> usize {
        self.receiver.max_capacity()
    }

    /// Splits off the raw receiver, e.g. to wrap it into a response stream.
    pub fn into_parts(self) -> (SubscriberId, TraceKey, mpsc::Receiver<Arc<BroadcastMessage>>) {
        (self.id, self.key, self.receiver)
    }
}

/// The registry-side (sending) half of a subscriber channel.
#[derive(Debug, Clone)]
pub(crate) struct SubscriberSlot {
    pub(crate) id: SubscriberId,
    pub(crate) sender: mpsc::Sender<Arc<BroadcastMessage>>,
}

impl SubscriberSlot {
    /// Messages currently queued and not yet consumed by the transport.
    pub(crate) fn occupancy(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Configured channel capacity.
    pub(crate) fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Creates a linked slot/subscriber pair. Capacity is clamped to at least 1.
pub(crate) fn subscriber_channel(id: SubscriberId, key: TraceKey, capacity: usize) -> (SubscriberSlot, Subscriber) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        SubscriberSlot { id, sender },
        Subscriber { id, key, receiver },
    )
}

/// Result of removing a subscriber from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// Nothing was registered under that key/id.
    NotFound,
    /// Removed; other subscribers remain for the key.
    Removed,
    /// Removed and the key has no subscribers left.
    LastRemoved,
}

/// Per-channel figures of a connection debug snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDebug {
    /// Owner of the channel.
    pub subscriber_id: SubscriberId,
    /// Messages waiting to be read.
    pub queued: usize,
    /// Configured channel capacity.
    pub capacity: usize,
}

/// Per-key figures of a connection debug snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDebug {
    /// Number of subscribers attached to the key.
    pub subscribers: usize,
    /// One entry per subscriber channel.
    pub channels: Vec<ChannelDebug>,
}

/// # Subscriber Registry
///
/// Map of trace key to its attached channels. Keys with no channels are never
/// kept in the map, so `keys()` and `count()` never report stale entries.
#[derive(Debug, Default)]
pub(crate) struct SubscriberRegistry {
    sets: HashMap<TraceKey, Vec<SubscriberSlot>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a slot under `key`.
    ///
    /// Returns `true` when this is the first subscriber of the key, which is
    /// the caller's cue to start the key's sync poller.
    pub(crate) fn insert(&mut self, key: TraceKey, slot: SubscriberSlot) -> bool {
        let set = self.sets.entry(key).or_default();
        set.push(slot);
        set.len() == 1
    }

    /// Removes the subscriber `id` from `key`. Removing twice is a no-op.
    pub(crate) fn remove(&mut self, key: &str, id: SubscriberId) -> Removal {
        let Some(set) = self.sets.get_mut(key) else {
            return Removal::NotFound;
        };

        let before = set.len();
        set.retain(|slot| slot.id != id);
        if set.len() == before {
            return Removal::NotFound;
        }

        if set.is_empty() {
            self.sets.remove(key);
            Removal::LastRemoved
        } else {
            Removal::Removed
        }
    }

    /// Channels currently registered under `key`.
    pub(crate) fn slots(&self, key: &str) -> &[SubscriberSlot] {
        self.sets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.sets.get(key).map_or(0, Vec::len)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.sets.contains_key(key)
    }

    pub(crate) fn keys(&self) -> BTreeSet<TraceKey> {
        self.sets.keys().cloned().collect()
    }

    /// Per-key subscriber counts and channel occupancy.
    pub(crate) fn debug_snapshot(&self) -> BTreeMap<TraceKey, ConnectionDebug> {
        self.sets
            .iter()
            .map(|(key, set)| {
                let channels = set
                    .iter()
                    .map(|slot| ChannelDebug {
                        subscriber_id: slot.id,
                        queued: slot.occupancy(),
                        capacity: slot.capacity(),
                    })
                    .collect();
                (
                    key.clone(),
                    ConnectionDebug {
                        subscribers: set.len(),
                        channels,
                    },
                )
            })
            .collect()
    }

    /// Drops every slot. Returns how many channels were released.
    pub(crate) fn clear(&mut self) -> usize {
        let released = self.sets.values().map(Vec::len).sum();
        self.sets.clear();
        released
    }
}
