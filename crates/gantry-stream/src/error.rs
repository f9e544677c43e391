//! Error types for gantry-stream

use gantry_core::{DecodeError, EventType};
use thiserror::Error;

/// Failures reading an event stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Record carried an event tag no variant matches
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Record payload did not parse for its tag
    #[error("invalid payload for {event_type}: {source}")]
    InvalidPayload {
        /// Tag of the record
        event_type: EventType,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },

    /// Connecting or reading the response body failed
    #[error("stream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A line exceeded the parser's length limit
    #[error("event stream line longer than {limit} bytes")]
    LineTooLong {
        /// Limit in bytes
        limit: usize,
    },

    /// The stream ended or was closed locally
    #[error("event stream closed")]
    Closed,

    /// Server answered the connect request with a non-success status
    #[error("event stream request rejected with status {0}")]
    Status(u16),
}

impl From<DecodeError> for StreamError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownEventType(tag) => Self::UnknownEventType(tag),
            DecodeError::InvalidPayload { event_type, source } => {
                Self::InvalidPayload { event_type, source }
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StreamError>;
