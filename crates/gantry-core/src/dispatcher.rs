//! Task completion dispatcher
//!
//! Watches the store for completed tasks and delivers their completion
//! callbacks through a fixed pool of workers:
//!
//! ```text
//! completed-task watch ──► work queue (bounded, try_send) ──► worker × N
//!                              │                                 │
//!                              └─ full: task dropped             ├─ start_task_resolving
//!                                                                ├─ POST callback
//!                                                                │  (retry 502/503/504)
//!                                                                └─ resolve_task
//! ```
//!
//! The watch loop never waits on the queue, so it always stays responsive
//! to stop signals and watch errors. Dropped tasks come back on a later
//! watch.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{Result, StoreError};
use crate::models::Task;
use crate::shutdown::StopSignal;
use crate::store::{TaskResolver, WatchSignal, WatchSource, WatchStream};

mod worker;

pub use worker::{
    classify_status, CallbackWorker, DeliveryError, DeliveryOutcome, StatusClass,
    RETRYABLE_STATUSES,
};

type WorkQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

async fn next_task(watch: &mut Option<WatchStream<Task>>) -> WatchSignal<Task> {
    match watch {
        Some(watch) => watch.next().await,
        None => pending().await,
    }
}

async fn rewatch_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn take_work(queue: &WorkQueue) -> Option<Task> {
    queue.lock().await.recv().await
}

async fn work(
    id: usize,
    worker: Arc<CallbackWorker>,
    queue: WorkQueue,
    forced: CancellationToken,
) {
    debug!(worker = id, "Delivery worker started");
    loop {
        let task = tokio::select! {
            biased;
            _ = forced.cancelled() => break,
            task = take_work(&queue) => match task {
                Some(task) => task,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = forced.cancelled() => {
                worker::log_outcome(&task.task_guid, &Err(DeliveryError::Abandoned));
                break;
            }
            result = worker.deliver(&task) => worker::log_outcome(&task.task_guid, &result),
        }
    }
    debug!(worker = id, "Delivery worker exiting");
}

/// Delivers task-completion callbacks for tasks announced by the store.
pub struct CompletionDispatcher {
    source: Arc<dyn WatchSource>,
    worker: Arc<CallbackWorker>,
    config: DispatcherConfig,
}

impl CompletionDispatcher {
    /// Create a dispatcher with an HTTP client built from `config`.
    pub fn new(
        source: Arc<dyn WatchSource>,
        resolver: Arc<dyn TaskResolver>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(source, resolver, client, config))
    }

    /// Create a dispatcher using an existing HTTP client.
    pub fn with_client(
        source: Arc<dyn WatchSource>,
        resolver: Arc<dyn TaskResolver>,
        client: reqwest::Client,
        config: DispatcherConfig,
    ) -> Self {
        let worker = Arc::new(CallbackWorker::new(client, resolver, config.max_attempts));
        Self {
            source,
            worker,
            config,
        }
    }

    /// Open the completed-task watch. Leaves `watch` empty without
    /// scheduling a re-watch if a stop arrives first.
    async fn open_watch(
        &self,
        stop: &StopSignal,
        watch: &mut Option<WatchStream<Task>>,
        rewatch: &mut Option<Pin<Box<Sleep>>>,
    ) {
        let opened = tokio::select! {
            biased;
            _ = stop.stopping() => {
                debug!("Stop requested while opening completed-task watch");
                return;
            }
            opened = self.source.watch_completed_tasks() => opened,
        };
        match opened {
            Ok(stream) => {
                info!("Watching for completed tasks");
                *watch = Some(stream);
            }
            Err(e) => self.schedule_rewatch(e, rewatch),
        }
    }

    fn schedule_rewatch(&self, err: StoreError, rewatch: &mut Option<Pin<Box<Sleep>>>) {
        warn!(
            error = %err,
            retry_ms = self.config.rewatch_interval_ms,
            "Completed-task watch failed, scheduling re-watch"
        );
        *rewatch = Some(Box::pin(sleep(self.config.rewatch_interval())));
    }

    fn enqueue(&self, queue: &mpsc::Sender<Task>, task: Task) {
        match queue.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                warn!(
                    task_guid = %task.task_guid,
                    capacity = self.config.queue_capacity,
                    "Work queue full, dropping completed task"
                );
            }
            Err(TrySendError::Closed(task)) => {
                warn!(
                    task_guid = %task.task_guid,
                    "Work queue closed, dropping completed task"
                );
            }
        }
    }

    /// Run until stopped.
    ///
    /// A graceful stop ends the completed-task watch, waits for its feed to
    /// close and lets the workers drain the queue. A forced stop returns at
    /// once; workers abandon their current delivery and exit on their own.
    pub async fn run(self, stop: StopSignal) {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let queue: WorkQueue = Arc::new(Mutex::new(queue_rx));

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            workers.spawn(work(
                id,
                Arc::clone(&self.worker),
                Arc::clone(&queue),
                stop.forced_token(),
            ));
        }
        info!(
            workers = workers.len(),
            queue_capacity = self.config.queue_capacity,
            "Task completion dispatcher started"
        );

        let mut watch = None;
        let mut rewatch = None;
        let mut draining = false;
        self.open_watch(&stop, &mut watch, &mut rewatch).await;

        loop {
            tokio::select! {
                biased;
                _ = stop.killed() => {
                    warn!("Dispatcher killed, abandoning queued work");
                    workers.detach_all();
                    return;
                }
                _ = stop.stopping(), if !draining => {
                    info!("Dispatcher stopping, closing completed-task watch");
                    draining = true;
                    rewatch = None;
                    match &watch {
                        Some(watch) => watch.stop(),
                        None => break,
                    }
                }
                signal = next_task(&mut watch) => match signal {
                    WatchSignal::Item(task) => self.enqueue(&queue_tx, task),
                    WatchSignal::Closed if draining => break,
                    WatchSignal::Failed(e) if draining => {
                        debug!(
                            error = %e,
                            "Completed-task watch ended with error while stopping"
                        );
                        break;
                    }
                    WatchSignal::Closed => {
                        watch = None;
                        self.schedule_rewatch(StoreError::WatchClosed, &mut rewatch);
                    }
                    WatchSignal::Failed(e) => {
                        watch = None;
                        self.schedule_rewatch(e, &mut rewatch);
                    }
                },
                _ = rewatch_due(&mut rewatch) => {
                    rewatch = None;
                    self.open_watch(&stop, &mut watch, &mut rewatch).await;
                }
            }
        }

        drop(watch);
        drop(queue_tx);
        info!("Completed-task watch closed, waiting for workers to drain");

        loop {
            tokio::select! {
                biased;
                _ = stop.killed() => {
                    warn!("Dispatcher killed while draining");
                    workers.detach_all();
                    return;
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!(error = %e, "Delivery worker failed"),
                    None => break,
                },
            }
        }
        info!("Task completion dispatcher stopped");
    }
}
