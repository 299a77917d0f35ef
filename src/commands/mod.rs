// Command handlers module
pub mod alerts;
pub mod config;
pub mod history;
pub mod notify;
pub mod run;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::storage::Database;

// Re-export command handlers for easy access
pub use alerts::{handle_alerts_command, handle_resolve_command};
pub use config::handle_config_action;
pub use history::handle_history_command;
pub use notify::handle_notify_test_command;
pub use run::{handle_run_command, handle_schedule_command};

pub fn open_database(config: &Config) -> Result<Database> {
    let path = config.database_path();
    tracing::debug!(path = %path.display(), "Opening database");
    Database::new(&path).with_context(|| format!("Failed to open database at {}", path.display()))
}
