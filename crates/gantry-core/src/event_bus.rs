//! Event hub - in-process fan-out of store change events.
//!
//! The change watcher emits typed [`Event`]s into the [`Hub`]; SSE
//! connections and internal consumers each hold a [`Subscriber`] with a
//! bounded mailbox. A consumer that falls more than a mailbox behind is
//! evicted rather than throttling the emitter.

/// Hub, subscriber cursors and presence signalling.
pub mod hub;
/// Event type definitions and their tagged JSON encoding.
pub mod types;

pub use hub::{Hub, Subscriber, SubscriberError, DEFAULT_MAILBOX_CAPACITY};
pub use types::{DecodeError, Event, EventType, Transition};
