//! CLI module for Gantry
//!
//! Provides commands:
//! - `serve`: Run the event hub, watcher and callback dispatcher (default)
//! - `events`: Print events from a running server's event stream

use clap::{Parser, Subcommand};

use crate::server::config::AppConfig;

pub mod events;

/// Default event stream of a local server
const DEFAULT_EVENTS_URL: &str = "http://127.0.0.1:8889/v1/events";

/// Gantry CLI
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(about = "Event fan-out and task completion callbacks for a scheduling store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Follow a server's event stream and print each event
    Events {
        /// Event stream URL
        #[arg(long, default_value = DEFAULT_EVENTS_URL)]
        url: String,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Events { url }) => events::run(&url).await,
        Some(Commands::Serve) | None => crate::server::run(config).await,
    }
}
