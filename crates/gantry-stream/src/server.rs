//! SSE endpoint over a hub subscription

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use gantry_core::{Event, Hub, Subscriber, SubscriberError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Route serving the event stream
pub const EVENTS_PATH: &str = "/v1/events";

/// Encode one hub event as an SSE record with sequence number `id`.
pub fn to_sse_event(event: &Event, id: u64) -> Result<SseEvent, serde_json::Error> {
    let payload = event.payload_json()?;
    Ok(SseEvent::default()
        .id(id.to_string())
        .event(event.event_type().as_str())
        .data(payload))
}

/// Stream a subscriber's events as SSE records.
///
/// Sequence numbers start at 0 per subscriber. The stream ends when the
/// subscriber is evicted or closed; dropping it closes the subscriber.
pub fn subscriber_stream(
    subscriber: Subscriber,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold((subscriber, 0u64), |(subscriber, id)| async move {
        loop {
            match subscriber.next().await {
                Ok(event) => match to_sse_event(&event, id) {
                    Ok(record) => return Some((Ok(record), (subscriber, id + 1))),
                    Err(e) => {
                        warn!(
                            subscriber = %subscriber.id(),
                            event_type = %event.event_type(),
                            error = %e,
                            "Skipping event that failed to encode"
                        );
                    }
                },
                Err(SubscriberError::SlowConsumer) => {
                    warn!(
                        subscriber = %subscriber.id(),
                        sent = id,
                        "Subscriber fell behind, ending stream"
                    );
                    return None;
                }
                Err(SubscriberError::Closed) => {
                    debug!(
                        subscriber = %subscriber.id(),
                        sent = id,
                        "Subscriber closed, ending stream"
                    );
                    return None;
                }
            }
        }
    })
}

/// Shared state of the event stream routes.
#[derive(Clone)]
pub struct StreamState {
    hub: Hub,
    shutdown: CancellationToken,
}

impl StreamState {
    /// Serve `hub`, ending every open stream once `shutdown` is cancelled.
    pub fn new(hub: Hub, shutdown: CancellationToken) -> Self {
        Self { hub, shutdown }
    }
}

/// `GET /v1/events`: subscribe to the hub for the life of the response.
pub async fn event_stream_handler(
    State(state): State<StreamState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscriber = state.hub.subscribe();
    info!(
        subscriber = %subscriber.id(),
        subscribers = state.hub.subscriber_count(),
        "Event stream opened"
    );
    let records = subscriber_stream(subscriber).take_until(state.shutdown.cancelled_owned());
    Sse::new(records).keep_alive(KeepAlive::default())
}

/// Router serving the event stream for `hub` until `shutdown`.
pub fn router(hub: Hub, shutdown: CancellationToken) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(event_stream_handler))
        .with_state(StreamState::new(hub, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::DesiredSpec;

    #[tokio::test]
    async fn test_subscriber_stream_numbers_records() {
        let hub = Hub::new();
        let records = subscriber_stream(hub.subscribe());
        futures::pin_mut!(records);

        hub.emit(Event::DesiredSpecCreated(DesiredSpec::new("web", "apps", 1)));
        hub.emit(Event::DesiredSpecRemoved(DesiredSpec::new("web", "apps", 1)));

        assert!(records.next().await.is_some());
        assert!(records.next().await.is_some());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_stream_ends_on_eviction() {
        let hub = Hub::with_capacity(2);
        let records = subscriber_stream(hub.subscribe());
        futures::pin_mut!(records);

        for n in 0..3 {
            hub.emit(Event::DesiredSpecCreated(DesiredSpec::new(
                format!("web-{n}"),
                "apps",
                1,
            )));
        }

        // The backlog is still delivered before the stream ends.
        assert!(records.next().await.is_some());
        assert!(records.next().await.is_some());
        assert!(records.next().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_subscriber() {
        let hub = Hub::new();
        let records = subscriber_stream(hub.subscribe());
        assert!(hub.has_subscribers());

        drop(records);

        assert!(!hub.has_subscribers());
    }

    #[test]
    fn test_to_sse_event_encodes() {
        let event = Event::DesiredSpecCreated(DesiredSpec::new("web", "apps", 1));
        assert!(to_sse_event(&event, 7).is_ok());
    }
}
