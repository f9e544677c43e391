//! Error types for gantry-core

use thiserror::Error;

use crate::dispatcher::DeliveryError;
use crate::event_bus::{DecodeError, SubscriberError};
use crate::models::TaskState;

/// Failures reported by the backing store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store could not be reached or refused the request
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No task with the given identifier
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A task with the given identifier already exists
    #[error("task already exists: {0}")]
    TaskExists(String),

    /// Task is not in a state that allows the requested transition
    #[error("task {task_guid} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task identifier
        task_guid: String,
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// The watch feed ended without being stopped
    #[error("watch closed unexpectedly")]
    WatchClosed,

    /// The watcher did not keep up and its feed was cut
    #[error("watch fell behind and was dropped")]
    WatchOverflow,
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Hub subscriber error
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),

    /// Event decoding error
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Callback delivery error
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// HTTP client construction failed
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
