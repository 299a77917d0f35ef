use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "protomon")]
#[command(about = "DeFi protocol metrics monitor with anomaly alerts")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON output format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize fresh configuration
    Init,
    /// Set configuration value
    Set {
        /// Configuration key (e.g., thresholds.tvl_drop_pct)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run one ingestion and alerting cycle
    Run,

    /// Run cycles on a fixed interval until interrupted
    Schedule {
        /// Seconds between cycles (defaults to pipeline.cycle_interval_secs)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: Option<u64>,
    },

    /// List alerts (open only unless --all)
    Alerts {
        /// Include resolved alerts
        #[arg(long)]
        all: bool,
        /// Filter by protocol name
        #[arg(long)]
        protocol: Option<String>,
    },

    /// Show stored snapshots for a protocol
    History {
        /// Protocol name
        protocol: String,
        /// How far back to look
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Mark an open alert as resolved
    Resolve {
        /// Alert id
        id: i64,
    },

    /// Send a test notification
    #[command(name = "notify-test")]
    NotifyTest,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from(["protomon", "run", "--json", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.command, Commands::Run);
        assert!(cli.json);
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
    }

    #[test]
    fn test_parse_alerts_filters() {
        let cli = Cli::try_parse_from(["protomon", "alerts", "--all", "--protocol", "aave-v3"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Alerts {
                all: true,
                protocol: Some("aave-v3".to_string())
            }
        );
    }

    #[test]
    fn test_parse_history_default_hours() {
        let cli = Cli::try_parse_from(["protomon", "history", "aave-v3"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::History {
                protocol: "aave-v3".to_string(),
                hours: 24
            }
        );
    }

    #[test]
    fn test_schedule_rejects_zero_interval() {
        assert!(Cli::try_parse_from(["protomon", "schedule", "--interval-secs", "0"]).is_err());
        let cli = Cli::try_parse_from(["protomon", "schedule", "--interval-secs", "60"]).unwrap();
        assert_eq!(cli.command, Commands::Schedule { interval_secs: Some(60) });
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::try_parse_from(["protomon", "config", "set", "pipeline.workers", "8"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Set {
                    key: "pipeline.workers".to_string(),
                    value: "8".to_string()
                }
            }
        );
    }

    #[test]
    fn test_notify_test_name() {
        let cli = Cli::try_parse_from(["protomon", "notify-test"]).unwrap();
        assert_eq!(cli.command, Commands::NotifyTest);
    }
}
