//! Server configuration types

use std::time::Duration;

use gantry_core::{DispatcherConfig, HubConfig, WatcherConfig};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8889
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// In-memory store maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often stuck resolving tasks are looked for
    #[serde(default = "default_convergence_interval_secs")]
    pub convergence_interval_secs: u64,
    /// How long a task may stay resolving before it is announced again
    #[serde(default = "default_resolving_timeout_secs")]
    pub resolving_timeout_secs: u64,
}

fn default_convergence_interval_secs() -> u64 {
    30
}

fn default_resolving_timeout_secs() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            convergence_interval_secs: default_convergence_interval_secs(),
            resolving_timeout_secs: default_resolving_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn convergence_interval(&self) -> Duration {
        Duration::from_secs(self.convergence_interval_secs.max(1))
    }

    pub fn resolving_timeout(&self) -> Duration {
        Duration::from_secs(self.resolving_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.server.port, 8889);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.log.json);
        assert_eq!(config.hub.mailbox_capacity, 1024);
        assert_eq!(config.dispatcher.workers, 20);
        assert_eq!(config.store.resolving_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_convergence_interval_is_clamped() {
        let store = StoreConfig {
            convergence_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert_eq!(store.convergence_interval(), Duration::from_secs(1));
    }
}
