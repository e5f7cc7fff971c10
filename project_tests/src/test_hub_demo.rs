//! # Trace Hub Demo Runner
//!
//! Wires configuration, logging and the hub together the way a server would,
//! then plays a short session: two subscribers on one trace, a burst of
//! change signals from a watcher thread, and a clean shutdown.
//!
//! Settings come from `tracehub.json`, `TRACEHUB_*` variables and CLI flags.
//! With `--sync-base-url` set, the hub also polls the remote while the
//! subscribers are attached.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use lib_tracehub::configs::load_config;
use lib_tracehub::core::{SyncClient, TraceHub, TraceKey};
use lib_tracehub::loggers::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_config().context("loading settings")?;
    let _log_guard = init_tracing(&settings.log)?;

    let sync_client = match &settings.sync {
        Some(endpoint) => {
            let client = endpoint.connect().context("building sync client")?;
            Some(Arc::new(client) as Arc<dyn SyncClient>)
        }
        None => None,
    };

    let hub = TraceHub::new(settings.hub.clone(), sync_client);
    hub.attach()?;

    let key = TraceKey::from("demo-trace");
    let mut first = hub.register_connection(key.clone());
    let mut second = hub.register_connection(key.clone());

    // --- Watcher thread: a burst of saves ---
    let callback = hub.notifier().callback();
    let watcher_key = key.clone();
    thread::spawn(move || {
        for _ in 0..5 {
            callback(watcher_key.clone());
            thread::sleep(Duration::from_millis(20));
        }
    });

    let wait = settings.hub.debounce_window + Duration::from_millis(500);
    for (name, sub) in [("first", &mut first), ("second", &mut second)] {
        match tokio::time::timeout(wait, sub.recv()).await {
            Ok(Some(message)) => println!("[{}] {}", name, message.to_json()?),
            Ok(None) => println!("[{}] stream closed", name),
            Err(_) => println!("[{}] nothing received within {:?}", name, wait),
        }
    }

    println!("[*] subscribers: {:#?}", hub.connection_debug_snapshot().await);
    println!("[*] polling: {:?}", hub.sync_polling_traces().await);

    hub.unregister_connection(key.clone(), second.id());
    println!("[*] remaining on {}: {}", key, hub.connection_count(key.clone()).await);

    let report = hub.shutdown().await;
    tracing::info!(?report, "demo finished");
    println!("[*] shutdown: {:?}", report);
    Ok(())
}
