//! Graceful Shutdown Manager
//!
//! Coordinates the two-level stop used by the background loops:
//!
//! - **graceful**: stop upstream watches, drain queues, let workers finish
//! - **forced**: return immediately; in-flight work is abandoned
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//!
//! // Give signals to components
//! dispatcher.run(shutdown.signal()).await;
//!
//! // First Ctrl+C drains, the second one forces
//! shutdown_on_signals(shutdown.clone()).await;
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time allowed for graceful draining before forcing
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Graceful stop requested, components are draining
    Draining,
    /// Forced stop requested
    Terminating,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Stop signal handed to a long-running component.
///
/// A forced stop implies a graceful one, so components that only care
/// about "stop" can wait on [`stopping`](Self::stopping) alone.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl StopSignal {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop.
    pub fn stop(&self) {
        self.graceful.cancel();
    }

    /// Request a forced stop.
    pub fn kill(&self) {
        self.forced.cancel();
        self.graceful.cancel();
    }

    /// Whether any stop was requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.graceful.is_cancelled()
    }

    /// Whether a forced stop was requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.forced.is_cancelled()
    }

    /// Resolves once any stop is requested.
    pub async fn stopping(&self) {
        self.graceful.cancelled().await;
    }

    /// Resolves once a forced stop is requested.
    pub async fn killed(&self) {
        self.forced.cancelled().await;
    }

    /// Token cancelled on a forced stop.
    #[must_use]
    pub fn forced_token(&self) -> CancellationToken {
        self.forced.clone()
    }
}

/// Shutdown controller for coordinating graceful shutdown
pub struct ShutdownController {
    /// Signal shared with all components
    signal: StopSignal,
    /// Current shutdown phase
    phase: AtomicU32,
    /// Time allowed for draining
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a new shutdown controller with default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Create a new shutdown controller with custom drain timeout
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            signal: StopSignal::new(),
            phase: AtomicU32::new(ShutdownPhase::Running as u32),
            drain_timeout,
        })
    }

    /// Get a stop signal for a component
    #[must_use]
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// Get a token cancelled on graceful stop
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.signal.graceful.child_token()
    }

    /// Get current shutdown phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::Draining,
            _ => ShutdownPhase::Terminating,
        }
    }

    /// Advance to `phase` if it is later than the current one.
    fn advance(&self, phase: ShutdownPhase) -> bool {
        let previous = self.phase.fetch_max(phase as u32, Ordering::SeqCst);
        if previous >= phase as u32 {
            return false;
        }
        info!(phase = %phase, "Shutdown phase changed");
        true
    }

    /// Initiate graceful shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if self.advance(ShutdownPhase::Draining) {
            info!("Initiating graceful shutdown...");
            self.signal.stop();
        }
    }

    /// Trigger immediate shutdown (skip graceful draining)
    pub fn force_shutdown(&self) {
        if self.advance(ShutdownPhase::Terminating) {
            warn!("Force shutdown initiated");
            self.signal.kill();
        }
    }

    /// Wait for `handle` to finish within the drain timeout, forcing
    /// shutdown if it does not.
    pub async fn drain<T>(&self, name: &str, handle: tokio::task::JoinHandle<T>) {
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.drain_timeout, handle).await {
            Ok(Ok(_)) => info!(component = name, "Component stopped"),
            Ok(Err(e)) => warn!(component = name, error = %e, "Component task failed"),
            Err(_) => {
                warn!(
                    component = name,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain timeout exceeded, force terminating"
                );
                self.force_shutdown();
                abort.abort();
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Drive a controller from OS signals: the first signal drains, a second
/// one forces.
pub async fn shutdown_on_signals(controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    controller.shutdown();
    wait_for_shutdown_signal().await;
    controller.force_shutdown();
}

#[cfg(test)]
mod tests;
