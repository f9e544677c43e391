//! Tunables for the hub, change watcher and dispatcher.
//!
//! All structs deserialize with defaults so partial TOML sections work.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Events buffered per subscriber before it is evicted
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_mailbox_capacity() -> usize {
    crate::event_bus::DEFAULT_MAILBOX_CAPACITY
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

/// Change watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Delay before re-opening a failed watch, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    3000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl WatcherConfig {
    /// Set the retry interval
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Retry interval as a duration
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Task completion dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of delivery workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the shared work queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Callback attempts per task occurrence
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Delay before re-opening a failed completed-task watch, in milliseconds
    #[serde(default = "default_rewatch_interval_ms")]
    pub rewatch_interval_ms: u64,
}

fn default_workers() -> usize {
    20
}

fn default_queue_capacity() -> usize {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_rewatch_interval_ms() -> u64 {
    3000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            rewatch_interval_ms: default_rewatch_interval_ms(),
        }
    }
}

impl DispatcherConfig {
    /// Set the worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the attempt limit
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the re-watch delay
    #[must_use]
    pub fn with_rewatch_interval(mut self, interval: Duration) -> Self {
        self.rewatch_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Request timeout as a duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Re-watch delay as a duration
    #[must_use]
    pub fn rewatch_interval(&self) -> Duration {
        Duration::from_millis(self.rewatch_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.workers, 20);
        assert_eq!(config.queue_capacity, 20);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: DispatcherConfig = serde_json::from_str(r#"{"workers": 4}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 20);

        let hub: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(hub.mailbox_capacity, 1024);
    }

    #[test]
    fn test_watcher_retry_interval() {
        let config = WatcherConfig::default().with_retry_interval(Duration::from_millis(250));
        assert_eq!(config.retry_interval(), Duration::from_millis(250));
    }
}
