use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use crate::commands::open_database;
use crate::config::Config;
use crate::models::ProtocolSnapshot;
use crate::output::OutputFormat;
use crate::storage::SnapshotStore;

pub fn handle_history_command(config: &Config, protocol: &str, hours: u32, json_output: bool) -> Result<()> {
    let db = open_database(config)?;
    let since = Utc::now() - Duration::hours(hours as i64);

    let snapshots: Vec<ProtocolSnapshot> = db
        .history(protocol, since)
        .collect::<Result<_, _>>()
        .with_context(|| format!("Failed to read history for {}", protocol))?;

    if json_output {
        println!("{}", snapshots.to_json()?);
    } else {
        println!("Snapshots for {} (last {}h)", protocol, hours);
        println!("{}", snapshots.to_table());
    }

    Ok(())
}
