//! Change watcher
//!
//! Bridges the store's desired-spec and actual-instance watches into hub
//! events. Watches are only held open while the hub has subscribers; a
//! failing watch is retired and re-opened after a fixed delay without
//! disturbing the other kind.
//!
//! ```text
//!   presence ──┐
//!              ▼
//!   store ──► ChangeWatcher ──► Hub ──► subscribers
//!              ▲
//!   retry ─────┘
//! ```

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::StoreError;
use crate::event_bus::{Event, Hub, Transition};
use crate::models::{ActualInstance, DesiredSpec};
use crate::store::{Change, EntityKind, WatchSignal, WatchSource, WatchStream};

/// Watch state for one entity kind.
struct Session<T> {
    kind: EntityKind,
    stream: Option<WatchStream<Change<T>>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<T> Session<T> {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            stream: None,
            retry: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.stream.is_none() && self.retry.is_none()
    }

    fn install(&mut self, opened: Result<WatchStream<Change<T>>, StoreError>, retry: Duration) {
        match opened {
            Ok(stream) => {
                info!(kind = %self.kind, "Watch opened");
                self.stream = Some(stream);
            }
            Err(e) => self.fail(e, retry),
        }
    }

    fn fail(&mut self, err: StoreError, retry: Duration) {
        warn!(
            kind = %self.kind,
            error = %err,
            retry_ms = retry.as_millis() as u64,
            "Watch failed, scheduling retry"
        );
        self.retire();
        self.retry = Some(Box::pin(sleep(retry)));
    }

    /// Stop the active session, dropping anything still buffered.
    fn retire(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            debug!(kind = %self.kind, "Watch stopped");
        }
    }

    fn reset(&mut self) {
        self.retire();
        self.retry = None;
    }
}

async fn next_signal<T>(stream: &mut Option<WatchStream<Change<T>>>) -> WatchSignal<Change<T>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

fn desired_event(change: Change<DesiredSpec>) -> Event {
    match change {
        Change::Created(spec) => Event::DesiredSpecCreated(spec),
        Change::Changed { before, after } => {
            Event::DesiredSpecChanged(Transition { before, after })
        }
        Change::Removed(spec) => Event::DesiredSpecRemoved(spec),
    }
}

fn actual_event(change: Change<ActualInstance>) -> Event {
    match change {
        Change::Created(instance) => Event::ActualInstanceCreated(instance),
        Change::Changed { before, after } => {
            Event::ActualInstanceChanged(Transition { before, after })
        }
        Change::Removed(instance) => Event::ActualInstanceRemoved(instance),
    }
}

/// Translates store watches into hub events while anyone is listening.
pub struct ChangeWatcher {
    source: Arc<dyn WatchSource>,
    hub: Hub,
    retry_interval: Duration,
}

impl ChangeWatcher {
    /// Create a watcher feeding `hub` from `source`.
    pub fn new(source: Arc<dyn WatchSource>, hub: Hub, config: &WatcherConfig) -> Self {
        Self {
            source,
            hub,
            retry_interval: config.retry_interval(),
        }
    }

    /// Open a desired-spec watch. Leaves the session idle if `shutdown`
    /// fires first.
    async fn open_desired(
        &self,
        session: &mut Session<DesiredSpec>,
        shutdown: &CancellationToken,
    ) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => debug!(kind = %session.kind, "Open abandoned on shutdown"),
            opened = self.source.watch_desired_specs() => {
                session.install(opened, self.retry_interval)
            }
        }
    }

    async fn open_actual(
        &self,
        session: &mut Session<ActualInstance>,
        shutdown: &CancellationToken,
    ) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => debug!(kind = %session.kind, "Open abandoned on shutdown"),
            opened = self.source.watch_actual_instances() => {
                session.install(opened, self.retry_interval)
            }
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Change watcher starting");

        let mut presence = self.hub.presence();
        let mut desired = Session::new(EntityKind::DesiredSpec);
        let mut actual = Session::new(EntityKind::ActualInstance);

        if *presence.borrow_and_update() {
            self.open_desired(&mut desired, &shutdown).await;
            self.open_actual(&mut actual, &shutdown).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                changed = presence.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *presence.borrow_and_update() {
                        if desired.is_idle() {
                            self.open_desired(&mut desired, &shutdown).await;
                        }
                        if actual.is_idle() {
                            self.open_actual(&mut actual, &shutdown).await;
                        }
                    } else {
                        info!("No subscribers left, releasing watches");
                        desired.reset();
                        actual.reset();
                    }
                }
                signal = next_signal(&mut desired.stream) => match signal {
                    WatchSignal::Item(change) => {
                        self.hub.emit(desired_event(change));
                    }
                    WatchSignal::Failed(e) => desired.fail(e, self.retry_interval),
                    WatchSignal::Closed => {
                        desired.fail(StoreError::WatchClosed, self.retry_interval)
                    }
                },
                signal = next_signal(&mut actual.stream) => match signal {
                    WatchSignal::Item(change) => {
                        self.hub.emit(actual_event(change));
                    }
                    WatchSignal::Failed(e) => actual.fail(e, self.retry_interval),
                    WatchSignal::Closed => {
                        actual.fail(StoreError::WatchClosed, self.retry_interval)
                    }
                },
                _ = retry_due(&mut desired.retry) => {
                    desired.retry = None;
                    if self.hub.has_subscribers() {
                        self.open_desired(&mut desired, &shutdown).await;
                    }
                }
                _ = retry_due(&mut actual.retry) => {
                    actual.retry = None;
                    if self.hub.has_subscribers() {
                        self.open_actual(&mut actual, &shutdown).await;
                    }
                }
            }
        }

        desired.reset();
        actual.reset();
        info!("Change watcher stopped");
    }
}
