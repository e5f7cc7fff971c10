//! # Hub Lifecycle
//!
//! Attach/shutdown behaviour and the accounting properties the transport and
//! watcher rely on.

mod support;

use std::thread;

use lib_tracehub::core::{ShutdownReport, SubscriberId, SyncError, SyncOutcome, TraceHub, TraceKey};

use support::{advance, config, hub_with, ScriptedSync};

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything_and_releases_subscribers() {
    let remote = ScriptedSync::new();
    let hub = hub_with(config(), Some(remote.clone()));

    let mut a = hub.register_connection("a");
    let mut b = hub.register_connection("b");
    hub.notify("a");
    advance(10).await;
    assert_eq!(hub.pending_broadcast_traces().await.len(), 1);
    assert_eq!(hub.sync_polling_traces().await.len(), 2);

    let report = hub.shutdown().await;
    assert_eq!(report.cancelled_broadcasts, 1);
    assert_eq!(report.stopped_sync_tasks, 2);
    assert_eq!(report.failed_sync_tasks, 0);
    assert_eq!(report.released_subscribers, 2);

    assert!(!hub.is_attached());
    assert!(hub.active_keys().await.is_empty());

    // The cancelled timer never fires and the streams end.
    advance(1_000).await;
    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());

    let calls = remote.total_calls();
    advance(10_000).await;
    assert_eq!(remote.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn connection_count_tracks_registrations() {
    let hub = hub_with(config(), None);

    let subs: Vec<_> = (0..3).map(|_| hub.register_connection("k")).collect();
    assert_eq!(hub.connection_count("k").await, 3);

    hub.unregister_connection("k", subs[1].id());
    hub.unregister_connection("k", subs[1].id());
    hub.unregister_connection("k", SubscriberId(9_999));
    hub.unregister_connection("other", subs[0].id());
    assert_eq!(hub.connection_count("k").await, 2);

    let snapshot = hub.connection_debug_snapshot().await;
    assert_eq!(snapshot["k"].subscribers, 2);
    assert!(snapshot["k"].channels.iter().all(|c| c.queued == 0 && c.capacity == 100));

    hub.unregister_connection("k", subs[0].id());
    hub.unregister_connection("k", subs[2].id());
    assert_eq!(hub.connection_count("k").await, 0);
    assert!(hub.active_keys().await.is_empty());

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn notifications_further_apart_than_the_window_broadcast_twice() {
    let hub = hub_with(config(), None);
    let mut sub = hub.register_connection("t1");

    hub.notify("t1");
    advance(400).await;
    hub.notify("t1");
    advance(400).await;

    assert!(sub.try_recv().is_some());
    assert!(sub.try_recv().is_some());
    assert!(sub.try_recv().is_none());

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn notify_without_subscribers_is_harmless() {
    let hub = hub_with(config(), None);
    hub.notify("nobody");
    advance(400).await;
    assert!(hub.pending_broadcast_traces().await.is_empty());
    assert!(hub.active_keys().await.is_empty());
    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unregistering_the_last_subscriber_stops_the_poller() {
    let remote = ScriptedSync::new();
    let hub = hub_with(config(), Some(remote.clone()));

    let sub = hub.register_connection("t5");
    advance(10).await;
    assert!(hub.sync_polling_traces().await.contains("t5"));

    hub.unregister_connection("t5", sub.id());
    assert!(hub.sync_polling_traces().await.is_empty());

    let calls = remote.calls_for("t5");
    advance(20_000).await;
    assert_eq!(remote.calls_for("t5"), calls);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ensure_sync_polling_is_idempotent() {
    let remote = ScriptedSync::new();
    let hub = hub_with(config(), Some(remote.clone()));

    let _sub = hub.register_connection("t6");
    for _ in 0..3 {
        hub.ensure_sync_polling("t6");
    }
    advance(10).await;

    assert_eq!(hub.sync_polling_traces().await.len(), 1);
    assert_eq!(remote.calls_for("t6"), 1);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ensure_sync_polling_needs_a_subscriber() {
    let remote = ScriptedSync::new();
    let hub = hub_with(config(), Some(remote.clone()));

    hub.ensure_sync_polling("idle");
    advance(5_000).await;

    assert!(hub.sync_polling_traces().await.is_empty());
    assert_eq!(remote.total_calls(), 0);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn polling_can_restart_after_a_terminal_answer() {
    let remote = ScriptedSync::new();
    remote.script(
        "t7",
        vec![
            Err(SyncError::Transport("connection reset".into())),
            Ok(SyncOutcome::terminal()),
        ],
    );
    let hub = hub_with(config(), Some(remote.clone()));

    let _sub = hub.register_connection("t7");
    advance(2_500).await;
    assert_eq!(remote.calls_for("t7"), 2);
    assert!(hub.sync_polling_traces().await.is_empty());

    hub.ensure_sync_polling("t7");
    advance(10).await;
    assert!(hub.sync_polling_traces().await.contains("t7"));
    assert_eq!(remote.calls_for("t7"), 3);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_poller_is_replaced_on_next_ensure() {
    let remote = ScriptedSync::new();
    remote.panic_on("crash");
    let hub = hub_with(config(), Some(remote.clone()));

    let _sub = hub.register_connection("crash");
    advance(10).await;
    assert_eq!(remote.calls_for("crash"), 1);
    assert!(hub.sync_polling_traces().await.is_empty());

    hub.ensure_sync_polling("crash");
    advance(10).await;
    assert_eq!(remote.calls_for("crash"), 2);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_poller_is_counted_as_failed_on_shutdown() {
    let remote = ScriptedSync::new();
    remote.panic_on("crash");
    let hub = hub_with(config(), Some(remote.clone()));

    let _crashing = hub.register_connection("crash");
    let _healthy = hub.register_connection("ok");
    advance(10).await;
    assert_eq!(hub.sync_polling_traces().await.len(), 1);

    let report = hub.shutdown().await;
    assert_eq!(report.failed_sync_tasks, 1);
    assert_eq!(report.stopped_sync_tasks, 1);
    assert_eq!(report.released_subscribers, 2);
    assert!(hub.active_keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn request_sync_once_goes_straight_to_the_remote() {
    let remote = ScriptedSync::new();
    remote.script("t8", vec![Err(SyncError::Status { status: 500, body: "boom".into() })]);
    let hub = hub_with(config(), Some(remote.clone()));

    let err = hub.request_sync_once("t8", false).await.unwrap_err();
    assert_eq!(err, SyncError::Status { status: 500, body: "boom".into() });

    let outcome = hub.request_sync_once("t8", true).await.unwrap();
    assert_eq!(outcome, Some(SyncOutcome::running()));
    assert_eq!(remote.calls_for("t8"), 2);
    assert_eq!(remote.forced_calls(), 1);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watcher_thread_notifications_reach_subscribers() {
    let hub = hub_with(config(), None);
    let mut sub = hub.register_connection("watched");

    let callback = hub.notifier().callback();
    thread::spawn(move || {
        for _ in 0..10 {
            callback(TraceKey::from("watched"));
        }
    })
    .join()
    .unwrap();

    advance(400).await;
    assert_eq!(sub.len(), 1);
    hub.shutdown().await;
}

#[tokio::test]
async fn detached_hub_drops_work_quietly() {
    let hub = TraceHub::new(config(), None);
    let mut sub = hub.register_connection("t9");
    hub.notify("t9");
    hub.ensure_sync_polling("t9");

    assert!(sub.recv().await.is_none());
    assert_eq!(hub.connection_count("t9").await, 0);
    assert_eq!(hub.shutdown().await, ShutdownReport::default());
}
