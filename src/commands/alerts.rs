use anyhow::{Context, Result};
use chrono::Utc;

use crate::commands::open_database;
use crate::config::Config;
use crate::models::AlertStatus;
use crate::output::OutputFormat;
use crate::storage::AlertStore;

pub fn handle_alerts_command(config: &Config, all: bool, protocol: Option<&str>, json_output: bool) -> Result<()> {
    let db = open_database(config)?;
    let status = if all { AlertStatus::All } else { AlertStatus::Open };

    let alerts = match protocol {
        Some(protocol) => db.list_for_protocol(protocol, status),
        None => db.list(status),
    }
    .context("Failed to list alerts")?;

    if json_output {
        println!("{}", alerts.to_json()?);
    } else {
        println!("{}", alerts.to_table());
    }

    Ok(())
}

pub fn handle_resolve_command(config: &Config, id: i64, json_output: bool) -> Result<()> {
    let db = open_database(config)?;

    if !db.resolve(id, Utc::now()).context("Failed to resolve alert")? {
        match db.get(id).context("Failed to look up alert")? {
            Some(_) => anyhow::bail!("Alert {} is already resolved", id),
            None => anyhow::bail!("Alert {} not found", id),
        }
    }

    tracing::info!(alert_id = id, "Alert resolved");
    if json_output {
        println!(r#"{{"status": "success", "message": "Alert {} resolved"}}"#, id);
    } else {
        println!("Alert {} resolved", id);
    }

    Ok(())
}
