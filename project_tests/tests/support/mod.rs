//! Shared fixtures for the hub integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_tracehub::core::{HubConfig, SyncClient, SyncError, SyncOutcome, TraceHub, TraceKey};

/// A `SyncClient` that replays per-key scripts and records every call.
///
/// Once a key's script is used up it keeps answering "still running".
/// Keys marked with [`ScriptedSync::panic_on`] make every call panic.
#[derive(Default)]
pub struct ScriptedSync {
    calls: Mutex<Vec<(TraceKey, bool)>>,
    scripts: Mutex<HashMap<TraceKey, VecDeque<Result<SyncOutcome, SyncError>>>>,
    panicking: Mutex<HashSet<TraceKey>>,
}

impl ScriptedSync {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, key: &str, answers: Vec<Result<SyncOutcome, SyncError>>) {
        self.scripts.lock().unwrap().insert(TraceKey::from(key), answers.into());
    }

    pub fn panic_on(&self, key: &str) {
        self.panicking.lock().unwrap().insert(TraceKey::from(key));
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(k, _)| k.as_str() == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn forced_calls(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, force)| *force).count()
    }
}

#[async_trait]
impl SyncClient for ScriptedSync {
    async fn request_sync(&self, key: &TraceKey, force: bool) -> Result<SyncOutcome, SyncError> {
        self.calls.lock().unwrap().push((key.clone(), force));
        let panics = self.panicking.lock().unwrap().contains(key);
        if panics {
            panic!("remote client crashed on {key}");
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(SyncOutcome::running()))
    }
}

pub fn config() -> HubConfig {
    HubConfig {
        debounce_window: Duration::from_millis(300),
        subscriber_capacity: 100,
        poll_interval: Duration::from_secs(2),
        sync_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// An attached hub polling through `client`.
pub fn hub_with(config: HubConfig, client: Option<Arc<ScriptedSync>>) -> TraceHub {
    let client = client.map(|c| c as Arc<dyn SyncClient>);
    let hub = TraceHub::new(config, client);
    hub.attach().expect("tests run inside a tokio runtime");
    hub
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
