//! Store watch and resolution interfaces
//!
//! The scheduling store is an external collaborator. Gantry consumes it
//! through two traits:
//!
//! - [`WatchSource`]: per entity kind, a [`WatchStream`] of change
//!   notifications plus an error feed, cancelled through its stop token.
//! - [`TaskResolver`]: the two-phase completion calls used by the
//!   dispatcher.
//!
//! [`MemoryStore`] implements both in-process.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::models::{ActualInstance, DesiredSpec, Task};

mod memory;

pub use memory::MemoryStore;

/// Entity kinds the store can be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Desired process specs
    DesiredSpec,
    /// Actual process instances
    ActualInstance,
    /// Completed tasks
    CompletedTask,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DesiredSpec => write!(f, "desired_spec"),
            Self::ActualInstance => write!(f, "actual_instance"),
            Self::CompletedTask => write!(f, "completed_task"),
        }
    }
}

/// A create, update or delete notification for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// Record was created
    Created(T),
    /// Record was updated
    Changed {
        /// Snapshot before the update
        before: T,
        /// Snapshot after the update
        after: T,
    },
    /// Record was deleted
    Removed(T),
}

/// Outcome of waiting on a [`WatchStream`].
#[derive(Debug)]
pub enum WatchSignal<T> {
    /// A notification
    Item(T),
    /// The store reported an error; the session is no longer usable
    Failed(StoreError),
    /// The notification feed ended
    Closed,
}

/// Consumer side of one watch session.
///
/// Dropping the stream stops the session.
#[derive(Debug)]
pub struct WatchStream<T> {
    items: mpsc::Receiver<T>,
    errors: mpsc::Receiver<StoreError>,
    errors_open: bool,
    stop: CancellationToken,
}

impl<T> WatchStream<T> {
    /// Assemble a stream from its feeds and stop token.
    pub fn new(
        items: mpsc::Receiver<T>,
        errors: mpsc::Receiver<StoreError>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            items,
            errors,
            errors_open: true,
            stop,
        }
    }

    /// Wait for the next notification, error or end of feed.
    ///
    /// Errors take precedence over buffered notifications. Once stopped, the
    /// stream hands out what is already buffered and then reports `Closed`.
    pub async fn next(&mut self) -> WatchSignal<T> {
        loop {
            tokio::select! {
                biased;
                err = self.errors.recv(), if self.errors_open => match err {
                    Some(err) => return WatchSignal::Failed(err),
                    None => self.errors_open = false,
                },
                item = self.items.recv() => {
                    return match item {
                        Some(item) => WatchSignal::Item(item),
                        None => WatchSignal::Closed,
                    };
                }
                _ = self.stop.cancelled() => {
                    return match self.items.try_recv() {
                        Ok(item) => WatchSignal::Item(item),
                        Err(_) => WatchSignal::Closed,
                    };
                }
            }
        }
    }

    /// Ask the store to end the session. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl<T> Drop for WatchStream<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Producer side of one watch session, held by store implementations.
#[derive(Debug)]
pub struct WatchSink<T> {
    items: mpsc::Sender<T>,
    errors: mpsc::Sender<StoreError>,
    stop: CancellationToken,
}

impl<T> Clone for WatchSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            errors: self.errors.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<T> WatchSink<T> {
    /// Whether the consumer stopped or dropped the session.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.items.is_closed()
    }

    /// Resolves once the consumer stops the session.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    /// Token cancelled when the consumer stops the session.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Queue a notification without waiting.
    ///
    /// Returns `false` when the session is over: stopped, dropped, or cut
    /// because its buffer is full (the consumer is told via the error feed).
    pub fn offer(&self, item: T) -> bool {
        if self.is_stopped() {
            return false;
        }
        match self.items.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.errors.try_send(StoreError::WatchOverflow);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a notification, waiting for buffer space.
    pub async fn send(&self, item: T) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.items.send(item).await.is_ok()
    }

    /// Report an error to the consumer.
    pub fn fail(&self, err: StoreError) -> bool {
        self.errors.try_send(err).is_ok()
    }
}

/// Create a connected sink/stream pair buffering `buffer` notifications.
pub fn watch_channel<T>(buffer: usize) -> (WatchSink<T>, WatchStream<T>) {
    let (items_tx, items_rx) = mpsc::channel(buffer.max(1));
    let (errors_tx, errors_rx) = mpsc::channel(1);
    let stop = CancellationToken::new();
    (
        WatchSink {
            items: items_tx,
            errors: errors_tx,
            stop: stop.clone(),
        },
        WatchStream::new(items_rx, errors_rx, stop),
    )
}

/// Change-watch subscriptions offered by the store.
///
/// Each call opens a fresh session; callers re-invoke after an error or a
/// stop. Implementations do not retry internally.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Watch desired spec creations, updates and removals.
    async fn watch_desired_specs(&self) -> Result<WatchStream<Change<DesiredSpec>>, StoreError>;

    /// Watch actual instance creations, updates and removals.
    async fn watch_actual_instances(
        &self,
    ) -> Result<WatchStream<Change<ActualInstance>>, StoreError>;

    /// Watch tasks entering the completed state.
    async fn watch_completed_tasks(&self) -> Result<WatchStream<Task>, StoreError>;
}

/// Two-phase task resolution calls.
#[async_trait]
pub trait TaskResolver: Send + Sync {
    /// Claim a completed task for callback delivery.
    async fn start_task_resolving(&self, task_guid: &str) -> Result<(), StoreError>;

    /// Mark a resolving task as resolved.
    async fn resolve_task(&self, task_guid: &str) -> Result<(), StoreError>;
}
