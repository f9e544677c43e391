//! Integration tests for Gantry
//!
//! These tests wire the crates together the way the server does:
//! - store changes flowing through the watcher and hub to an SSE client
//! - completed tasks flowing through the dispatcher to a callback endpoint

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Router};
use gantry_core::{
    ActualInstance, ActualState, ChangeWatcher, CompletionDispatcher, DesiredSpec,
    DispatcherConfig, Event, EventType, Hub, MemoryStore, StopSignal, Task, TaskState,
    WatcherConfig,
};
use gantry_stream::{connect, router, EVENTS_PATH};
use tokio_util::sync::CancellationToken;

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ============================================================================
// Change events end to end
// ============================================================================

#[tokio::test]
async fn test_store_changes_reach_stream_clients() {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::new();
    let shutdown = CancellationToken::new();

    let watcher = ChangeWatcher::new(store.clone(), hub.clone(), &WatcherConfig::default());
    let watcher_handle = tokio::spawn(watcher.run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(hub.clone(), shutdown.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Nothing is watched until a client shows up.
    assert_eq!(store.open_watches(), (0, 0, 0));

    let mut reader = connect(&reqwest::Client::new(), &format!("http://{addr}{EVENTS_PATH}"))
        .await
        .unwrap();
    let observed = store.clone();
    eventually("watches opened", move || {
        let (desired, actual, _) = observed.open_watches();
        desired == 1 && actual == 1
    })
    .await;

    store.upsert_desired(DesiredSpec::new("web", "apps", 2));
    store.upsert_actual(ActualInstance::new("web", 0, "apps"));
    let mut running = ActualInstance::new("web", 0, "apps");
    running.state = ActualState::Running;
    running.cell_id = "cell-1".to_string();
    store.upsert_actual(running);
    store.remove_desired("web");

    let mut received = Vec::new();
    for _ in 0..4 {
        let event = tokio::time::timeout(Duration::from_secs(5), reader.next())
            .await
            .expect("event not delivered")
            .unwrap();
        received.push(event);
    }

    // Each kind keeps its own order; the two kinds may interleave.
    let desired: Vec<EventType> = received
        .iter()
        .map(Event::event_type)
        .filter(|t| t.as_str().starts_with("desired"))
        .collect();
    let actual: Vec<&Event> = received
        .iter()
        .filter(|e| e.event_type().as_str().starts_with("actual"))
        .collect();
    assert_eq!(
        desired,
        vec![EventType::DesiredSpecCreated, EventType::DesiredSpecRemoved]
    );
    assert!(matches!(
        actual[0],
        Event::ActualInstanceCreated(i) if i.state == ActualState::Unclaimed
    ));
    match actual[1] {
        Event::ActualInstanceChanged(t) => {
            assert_eq!(t.before.state, ActualState::Unclaimed);
            assert_eq!(t.after.state, ActualState::Running);
            assert_eq!(t.after.cell_id, "cell-1");
        }
        other => panic!("expected ActualInstanceChanged, got {other:?}"),
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher_handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.open_watches(), (0, 0, 0));
}

// ============================================================================
// Task callbacks end to end
// ============================================================================

#[derive(Clone)]
struct Callback {
    script: Arc<Mutex<VecDeque<u16>>>,
    hits: Arc<AtomicUsize>,
}

async fn answer(State(callback): State<Callback>) -> StatusCode {
    callback.hits.fetch_add(1, Ordering::SeqCst);
    let code = callback.script.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(code).unwrap()
}

async fn callback_endpoint(statuses: &[u16]) -> (String, Arc<AtomicUsize>) {
    let callback = Callback {
        script: Arc::new(Mutex::new(statuses.iter().copied().collect())),
        hits: Arc::new(AtomicUsize::new(0)),
    };
    let hits = callback.hits.clone();
    let app = Router::new()
        .route("/tasks/done", post(answer))
        .with_state(callback);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/tasks/done"), hits)
}

#[tokio::test]
async fn test_exhausted_callback_is_retried_after_convergence() {
    let (url, hits) = callback_endpoint(&[503, 503, 503]).await;
    let store = Arc::new(MemoryStore::new());
    let dispatcher = CompletionDispatcher::new(
        store.clone(),
        store.clone(),
        DispatcherConfig::default().with_workers(2),
    )
    .unwrap();
    let stop = StopSignal::new();
    let handle = tokio::spawn(dispatcher.run(stop.clone()));

    store
        .desire_task(Task::new("build-42", "ci").with_callback(url))
        .unwrap();
    store.start_task("build-42").unwrap();
    store
        .complete_task("build-42", false, "", "artifact.tar")
        .unwrap();

    let observed = hits.clone();
    eventually("first occurrence exhausted", move || {
        observed.load(Ordering::SeqCst) == 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.task("build-42").unwrap().state, TaskState::Resolving);

    assert_eq!(store.converge_tasks(Duration::ZERO), 1);

    let observed = store.clone();
    eventually("task resolved", move || {
        observed.task("build-42").map(|t| t.state) == Some(TaskState::Resolved)
    })
    .await;
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    stop.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
