use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::open_database;
use crate::config::Config;
use crate::output::OutputFormat;
use crate::pipeline::{build_pipeline, CycleStatus, CycleSummary};

fn print_summary(summary: &CycleSummary, json_output: bool) {
    if json_output {
        match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: Failed to serialize cycle summary: {}", e),
        }
    } else {
        println!("{}", summary.to_table());
    }
}

pub async fn handle_run_command(config: &Config, json_output: bool) -> Result<CycleStatus> {
    let db = Arc::new(open_database(config)?);
    let pipeline = build_pipeline(config, db)?;

    let summary = pipeline.run_cycle().await;
    print_summary(&summary, json_output);

    Ok(summary.status())
}

pub async fn handle_schedule_command(config: &Config, interval_secs: Option<u64>, json_output: bool) -> Result<()> {
    let db = Arc::new(open_database(config)?);
    let pipeline = build_pipeline(config, db)?;
    let every = Duration::from_secs(interval_secs.unwrap_or(config.pipeline.cycle_interval_secs));

    tracing::info!(
        interval_secs = every.as_secs(),
        protocols = pipeline.protocols().len(),
        "Scheduler started, press Ctrl-C to stop"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    let cycles = pipeline
        .run_forever(every, shutdown, |summary| print_summary(summary, json_output))
        .await;

    tracing::info!(cycles, "Scheduler stopped");
    Ok(())
}
