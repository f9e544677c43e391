//! Server module for Gantry
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `background_tasks`: Watcher, dispatcher and convergence startup
//! - `init`: Main server initialization and run loop

mod background_tasks;
pub mod config;
mod init;
mod loader;

// Re-export public API
pub use init::run;
pub use loader::load_config;
