//! Per-task callback delivery.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::Task;
use crate::store::TaskResolver;

/// Callback statuses worth another attempt.
pub const RETRYABLE_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// How a callback response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Try the callback again
    Retryable,
    /// Stop and resolve the task
    Terminal,
}

/// Classify a callback response status.
#[must_use]
pub fn classify_status(status: StatusCode) -> StatusClass {
    if RETRYABLE_STATUSES.contains(&status) {
        StatusClass::Retryable
    } else {
        StatusClass::Terminal
    }
}

/// Successful end of one delivery occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Task had no callback URL; it stays resolving
    NoCallback,
    /// Callback answered with a terminal status and the task was resolved
    Delivered {
        /// Final response status
        status: u16,
        /// Requests made
        attempts: u32,
    },
}

/// Reasons a delivery occurrence ended without resolving the task.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The store refused to mark the task resolving; nothing was sent
    #[error("failed to mark task resolving: {0}")]
    MarkResolving(#[source] StoreError),

    /// The task response could not be serialized
    #[error("failed to encode task response: {0}")]
    Encode(#[from] serde_json::Error),

    /// Building or sending the request failed
    #[error("callback request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Every attempt got a retryable status
    #[error("callback still unavailable after {attempts} attempts")]
    Exhausted {
        /// Requests made
        attempts: u32,
        /// Status of the last response
        last_status: Option<u16>,
    },

    /// Callback succeeded but the store refused to resolve the task
    #[error("failed to resolve task: {0}")]
    Resolve(#[source] StoreError),

    /// Forced shutdown interrupted the delivery
    #[error("delivery abandoned on forced shutdown")]
    Abandoned,
}

/// Runs the two-phase delivery protocol for one task at a time.
pub struct CallbackWorker {
    client: reqwest::Client,
    resolver: Arc<dyn TaskResolver>,
    max_attempts: u32,
}

impl CallbackWorker {
    /// Create a worker posting with `client`. Every occurrence makes at
    /// least one request.
    pub fn new(
        client: reqwest::Client,
        resolver: Arc<dyn TaskResolver>,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            resolver,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claim the task, post its callback and resolve it.
    ///
    /// The task is only claimed once per occurrence; retryable statuses are
    /// retried immediately up to the attempt limit, and the task is left
    /// resolving when they run out.
    pub async fn deliver(&self, task: &Task) -> Result<DeliveryOutcome, DeliveryError> {
        let task_guid = task.task_guid.as_str();

        self.resolver
            .start_task_resolving(task_guid)
            .await
            .map_err(DeliveryError::MarkResolving)?;

        let Some(url) = task.completion_callback_url.as_deref() else {
            debug!(task_guid, "Task has no completion callback");
            return Ok(DeliveryOutcome::NoCallback);
        };

        let body = serde_json::to_vec(&task.to_response())?;
        let mut last_status = None;

        for attempt in 1..=self.max_attempts {
            let response = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await?;
            let status = response.status();

            match classify_status(status) {
                StatusClass::Retryable => {
                    info!(
                        task_guid,
                        attempt,
                        status = status.as_u16(),
                        "Callback unavailable, retrying"
                    );
                    last_status = Some(status.as_u16());
                }
                StatusClass::Terminal => {
                    self.resolver
                        .resolve_task(task_guid)
                        .await
                        .map_err(DeliveryError::Resolve)?;
                    return Ok(DeliveryOutcome::Delivered {
                        status: status.as_u16(),
                        attempts: attempt,
                    });
                }
            }
        }

        Err(DeliveryError::Exhausted {
            attempts: self.max_attempts,
            last_status,
        })
    }
}

/// Log the end of a delivery occurrence.
pub(crate) fn log_outcome(task_guid: &str, result: &Result<DeliveryOutcome, DeliveryError>) {
    match result {
        Ok(DeliveryOutcome::NoCallback) => debug!(task_guid, "Task marked resolving"),
        Ok(DeliveryOutcome::Delivered { status, attempts }) => {
            info!(task_guid, status, attempts, "Task callback delivered, task resolved")
        }
        Err(DeliveryError::MarkResolving(e)) => {
            warn!(task_guid, error = %e, "Could not mark task resolving, skipping callback")
        }
        Err(e @ DeliveryError::Exhausted { .. }) => {
            warn!(task_guid, error = %e, "Giving up on callback, task left resolving")
        }
        Err(e) => error!(task_guid, error = %e, "Task callback failed"),
    }
}
