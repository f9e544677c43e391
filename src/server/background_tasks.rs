//! Background task startup functions
//!
//! Starts the change watcher, the completion dispatcher and store
//! convergence, each bound to the shutdown controller.

use super::config::{AppConfig, StoreConfig};
use anyhow::{Context, Result};
use gantry_core::{ChangeWatcher, CompletionDispatcher, Hub, MemoryStore, ShutdownController};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Start the change watcher feeding `hub`
pub fn start_change_watcher(
    config: &AppConfig,
    store: &Arc<MemoryStore>,
    hub: &Hub,
    shutdown_controller: &ShutdownController,
) -> JoinHandle<()> {
    let watcher = ChangeWatcher::new(store.clone(), hub.clone(), &config.watcher);
    tokio::spawn(watcher.run(shutdown_controller.token()))
}

/// Start the task completion dispatcher
pub fn start_dispatcher(
    config: &AppConfig,
    store: &Arc<MemoryStore>,
    shutdown_controller: &ShutdownController,
) -> Result<JoinHandle<()>> {
    let dispatcher =
        CompletionDispatcher::new(store.clone(), store.clone(), config.dispatcher.clone())
            .context("Failed to build task completion dispatcher")?;
    info!(
        workers = config.dispatcher.workers,
        max_attempts = config.dispatcher.max_attempts,
        "Task completion dispatcher configured"
    );
    Ok(tokio::spawn(dispatcher.run(shutdown_controller.signal())))
}

/// Start periodic re-announcement of tasks stuck in resolving
pub fn start_convergence(
    config: &AppConfig,
    store: &Arc<MemoryStore>,
    shutdown_controller: &ShutdownController,
) -> JoinHandle<()> {
    tokio::spawn(converge(
        store.clone(),
        config.store.clone(),
        shutdown_controller.token(),
    ))
}

async fn converge(store: Arc<MemoryStore>, config: StoreConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(config.convergence_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let kicked = store.converge_tasks(config.resolving_timeout());
                debug!(kicked, "Task convergence pass finished");
            }
        }
    }
    debug!("Task convergence stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{Task, TaskResolver, TaskState};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_convergence_reannounces_stuck_tasks() {
        let store = Arc::new(MemoryStore::new());
        store.desire_task(Task::new("t-1", "tests")).unwrap();
        store.complete_task("t-1", true, "exit 1", "").unwrap();
        store.start_task_resolving("t-1").await.unwrap();

        let config = StoreConfig {
            convergence_interval_secs: 1,
            resolving_timeout_secs: 0,
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(converge(store.clone(), config, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.task("t-1").unwrap().state, TaskState::Completed);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
