//! Gantry Core - event fan-out and task completion delivery
//!
//! This crate sits between the scheduling store and its clients:
//! - Event bus: typed events fanned out to bounded subscriber mailboxes
//! - Watcher: store change watches bridged into the hub while anyone listens
//! - Dispatcher: completed-task callbacks delivered by a worker pool
//! - Store: watch/resolve traits plus an in-memory backend
//! - Shutdown: graceful and forced stop signals

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod models;
pub mod shutdown;
pub mod store;
pub mod watcher;

pub use config::{DispatcherConfig, HubConfig, WatcherConfig};
pub use dispatcher::{
    classify_status, CallbackWorker, CompletionDispatcher, DeliveryError, DeliveryOutcome,
    StatusClass,
};
pub use error::{Error, Result, StoreError};
pub use event_bus::{
    DecodeError, Event, EventType, Hub, Subscriber, SubscriberError, Transition,
    DEFAULT_MAILBOX_CAPACITY,
};
pub use models::{
    ActualInstance, ActualState, DesiredSpec, ModificationTag, PortMapping, Task, TaskResponse,
    TaskState,
};
pub use shutdown::{
    shutdown_on_signals, wait_for_shutdown_signal, ShutdownController, ShutdownPhase, StopSignal,
};
pub use store::{
    watch_channel, Change, EntityKind, MemoryStore, TaskResolver, WatchSignal, WatchSink,
    WatchSource, WatchStream,
};
pub use watcher::ChangeWatcher;
