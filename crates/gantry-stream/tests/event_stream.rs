//! Event stream served over a real socket

use std::time::Duration;

use gantry_core::{ActualInstance, DesiredSpec, Event, Hub, Transition};
use gantry_stream::{connect, router, StreamError, EVENTS_PATH};
use tokio_util::sync::CancellationToken;

async fn serve_until(hub: Hub, shutdown: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(hub, shutdown)).await.unwrap();
    });
    format!("http://{addr}")
}

async fn serve(hub: Hub) -> String {
    serve_until(hub, CancellationToken::new()).await
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let hub = Hub::new();
    let base = serve(hub.clone()).await;
    let client = reqwest::Client::new();

    let mut reader = connect(&client, &format!("{base}{EVENTS_PATH}"))
        .await
        .unwrap();
    assert_eq!(hub.subscriber_count(), 1);

    let spec = DesiredSpec::new("web", "apps", 2);
    let mut scaled = spec.clone();
    scaled.instances = 4;
    let instance = ActualInstance::new("web", 0, "apps");
    let events = vec![
        Event::DesiredSpecCreated(spec.clone()),
        Event::DesiredSpecChanged(Transition {
            before: spec,
            after: scaled,
        }),
        Event::ActualInstanceCreated(instance.clone()),
        Event::ActualInstanceRemoved(instance),
    ];
    for event in &events {
        assert_eq!(hub.emit(event.clone()), 1);
    }

    for expected in events {
        let received = tokio::time::timeout(Duration::from_secs(5), reader.next())
            .await
            .expect("event not delivered")
            .unwrap();
        assert_eq!(received, expected);
    }
}

#[tokio::test]
async fn test_each_connection_is_its_own_subscriber() {
    let hub = Hub::new();
    let base = serve(hub.clone()).await;
    let client = reqwest::Client::new();
    let url = format!("{base}{EVENTS_PATH}");

    let mut first = connect(&client, &url).await.unwrap();
    let mut second = connect(&client, &url).await.unwrap();
    assert_eq!(hub.subscriber_count(), 2);

    let event = Event::DesiredSpecRemoved(DesiredSpec::new("worker", "apps", 1));
    assert_eq!(hub.emit(event.clone()), 2);

    assert_eq!(first.next().await.unwrap(), event);
    assert_eq!(second.next().await.unwrap(), event);
}

#[tokio::test]
async fn test_unknown_route_is_rejected() {
    let base = serve(Hub::new()).await;

    let result = connect(&reqwest::Client::new(), &format!("{base}/v1/nope")).await;

    assert!(matches!(result, Err(StreamError::Status(404))));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = connect(&reqwest::Client::new(), &format!("http://{addr}{EVENTS_PATH}")).await;

    assert!(matches!(result, Err(StreamError::Transport(_))));
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let hub = Hub::new();
    let shutdown = CancellationToken::new();
    let base = serve_until(hub.clone(), shutdown.clone()).await;

    let mut reader = connect(&reqwest::Client::new(), &format!("{base}{EVENTS_PATH}"))
        .await
        .unwrap();
    shutdown.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .expect("stream still open after shutdown");
    assert!(matches!(end, Err(StreamError::Closed)));
}
