//! Gantry Stream - Server-Sent Events transport for hub events
//!
//! Each hub event becomes one SSE record:
//!
//! ```text
//! id: 0
//! event: desired_spec_created
//! data: {"process_guid":"web",...}
//!
//! ```
//!
//! The server side streams a hub subscriber over a long-lived HTTP
//! response; the client side parses the byte stream back into [`Event`]s.
//!
//! [`Event`]: gantry_core::Event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod server;

pub use client::{connect, EventStreamReader, SseFrame, SseParser, MAX_LINE_LEN};
pub use error::{Result, StreamError};
pub use server::{
    event_stream_handler, router, subscriber_stream, to_sse_event, StreamState, EVENTS_PATH,
};
