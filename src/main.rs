// protomon: DeFi protocol metrics monitor
use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use protomon::cli::{Cli, Commands};
use protomon::commands::{
    handle_alerts_command, handle_config_action, handle_history_command, handle_notify_test_command,
    handle_resolve_command, handle_run_command, handle_schedule_command,
};
use protomon::config::Config;

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "protomon=debug" } else { "protomon=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_command(command: Commands, config: &Config, config_path: &Path, json_output: bool) -> anyhow::Result<()> {
    match command {
        Commands::Run => {
            let status = handle_run_command(config, json_output).await?;
            std::process::exit(status.exit_code());
        }
        Commands::Schedule { interval_secs } => {
            handle_schedule_command(config, interval_secs, json_output).await?;
        }
        Commands::Alerts { all, protocol } => {
            handle_alerts_command(config, all, protocol.as_deref(), json_output)?;
        }
        Commands::History { protocol, hours } => {
            handle_history_command(config, &protocol, hours, json_output)?;
        }
        Commands::Resolve { id } => {
            handle_resolve_command(config, id, json_output)?;
        }
        Commands::NotifyTest => {
            handle_notify_test_command(config, json_output)
                .await
                .context("notify-test failed")?;
        }
        Commands::Config { action } => handle_config_action(&action, config_path, json_output),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };

    match cli.command {
        // Config commands read and write the file themselves
        Commands::Config { action } => handle_config_action(&action, &config_path, cli.json),
        command => {
            let config = match Config::load_from(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: Failed to load configuration: {e:#}");
                    std::process::exit(1);
                }
            };
            run_command(command, &config, &config_path, cli.json).await?;
        }
    }

    Ok(())
}
