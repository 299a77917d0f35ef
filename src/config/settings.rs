use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::alerts::thresholds::ThresholdConfig;
use crate::ingest::normalizer::ApyUnit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub thresholds: ThresholdConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub protocols: Vec<ProtocolConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String, // "~/" is expanded against the home directory
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_base: String,
    pub endpoint: String, // path segment between api_base and the protocol slug
    #[serde(default)]
    pub apy_unit: ApyUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub request_timeout_secs: u64,
    pub total_budget_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub cycle_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

fn default_notifier_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Lending,
    Dex,
    Other,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Lending => "lending",
            ProtocolKind::Dex => "dex",
            ProtocolKind::Other => "other",
        }
    }
}

/// One monitored protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Identifier stored with snapshots and alerts
    pub name: String,
    pub display_name: String,
    /// Identifier used in the data-source URL
    pub slug: String,
    pub kind: ProtocolKind,
}

impl ProtocolConfig {
    pub fn lending(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            slug: name.to_string(),
            kind: ProtocolKind::Lending,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let db_path = dirs::data_dir()
            .map(|dir| dir.join("protomon").join("monitor.db").display().to_string())
            .unwrap_or_else(|| "protomon.db".to_string());

        Self {
            database: DatabaseConfig { path: db_path },
            source: SourceConfig {
                api_base: "https://api.llama.fi".to_string(),
                endpoint: "tvl".to_string(),
                apy_unit: ApyUnit::Percent,
            },
            fetch: FetchConfig {
                request_timeout_secs: 30,
                total_budget_secs: 120,
                max_attempts: 3,
                base_backoff_ms: 2000,
                max_backoff_ms: 30000,
            },
            thresholds: ThresholdConfig::default(),
            pipeline: PipelineConfig {
                workers: 4,
                cycle_interval_secs: 3600,
            },
            notifier: NotifierConfig {
                webhook_url: None,
                timeout_secs: default_notifier_timeout(),
            },
            protocols: vec![
                ProtocolConfig::lending("aave-v3", "Aave V3"),
                ProtocolConfig::lending("compound-v3", "Compound V3"),
            ],
        }
    }
}

impl Config {
    /// Load from `path` and apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// The file contents alone, without environment overrides. A commented
    /// default file is written first if none exists.
    pub fn load_file(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Self>(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = self.to_commented_toml();
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home.join(".config").join("protomon").join("config.toml"))
    }

    pub fn database_path(&self) -> PathBuf {
        match self.database.path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.database.path)),
            None => PathBuf::from(&self.database.path),
        }
    }

    /// PROTOMON_DB_PATH, PROTOMON_API_BASE and SLACK_WEBHOOK_URL take
    /// precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PROTOMON_DB_PATH").filter(|v| !v.is_empty()) {
            self.database.path = path;
        }
        if let Some(base) = lookup("PROTOMON_API_BASE").filter(|v| !v.is_empty()) {
            self.source.api_base = base;
        }
        if let Some(url) = lookup("SLACK_WEBHOOK_URL").filter(|v| !v.is_empty()) {
            self.notifier.webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        if self.fetch.max_attempts == 0 {
            anyhow::bail!("fetch.max_attempts must be at least 1");
        }
        if self.fetch.request_timeout_secs == 0 || self.fetch.total_budget_secs == 0 {
            anyhow::bail!("fetch timeouts must be greater than zero");
        }
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.cycle_interval_secs == 0 {
            anyhow::bail!("pipeline.cycle_interval_secs must be greater than zero");
        }

        let mut seen = std::collections::HashSet::new();
        for protocol in &self.protocols {
            if protocol.name.trim().is_empty() {
                anyhow::bail!("Protocol names must not be empty");
            }
            if protocol.slug.trim().is_empty() {
                anyhow::bail!("Protocol '{}' has an empty slug", protocol.name);
            }
            if !seen.insert(protocol.name.as_str()) {
                anyhow::bail!("Protocol '{}' is configured more than once", protocol.name);
            }
        }

        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, value, e))
        }

        match key {
            "database.path" => self.database.path = value.to_string(),
            "source.api_base" => self.source.api_base = value.to_string(),
            "source.endpoint" => self.source.endpoint = value.to_string(),
            "source.apy_unit" => {
                self.source.apy_unit = match value {
                    "percent" => ApyUnit::Percent,
                    "fraction" => ApyUnit::Fraction,
                    _ => anyhow::bail!("Invalid apy_unit: {}. Must be 'percent' or 'fraction'", value),
                }
            }
            "fetch.request_timeout_secs" => self.fetch.request_timeout_secs = parse(key, value)?,
            "fetch.total_budget_secs" => self.fetch.total_budget_secs = parse(key, value)?,
            "fetch.max_attempts" => self.fetch.max_attempts = parse(key, value)?,
            "fetch.base_backoff_ms" => self.fetch.base_backoff_ms = parse(key, value)?,
            "fetch.max_backoff_ms" => self.fetch.max_backoff_ms = parse(key, value)?,
            "thresholds.tvl_drop_pct" => self.thresholds.tvl_drop_pct = parse(key, value)?,
            "thresholds.apy_low_pct" => self.thresholds.apy_low_pct = parse(key, value)?,
            "thresholds.utilization_high_pct" => self.thresholds.utilization_high_pct = parse(key, value)?,
            "thresholds.lookback.target_hours" => self.thresholds.lookback.target_hours = parse(key, value)?,
            "thresholds.lookback.min_hours" => self.thresholds.lookback.min_hours = parse(key, value)?,
            "thresholds.lookback.max_hours" => self.thresholds.lookback.max_hours = parse(key, value)?,
            "pipeline.workers" => self.pipeline.workers = parse(key, value)?,
            "pipeline.cycle_interval_secs" => self.pipeline.cycle_interval_secs = parse(key, value)?,
            "notifier.webhook_url" => {
                self.notifier.webhook_url = if value.is_empty() { None } else { Some(value.to_string()) }
            }
            "notifier.timeout_secs" => self.notifier.timeout_secs = parse(key, value)?,
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }

        self.validate()
    }

    /// Render the configuration as TOML with explanatory comments
    pub fn to_commented_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# protomon configuration\n");
        output.push_str("# Environment overrides: PROTOMON_DB_PATH, PROTOMON_API_BASE, SLACK_WEBHOOK_URL\n\n");

        output.push_str("[database]\n");
        output.push_str("# SQLite file holding snapshots and alerts\n");
        output.push_str(&format!("path = {}\n\n", toml_string(&self.database.path)));

        output.push_str("[source]\n");
        output.push_str("# Metrics are read from GET {api_base}/{endpoint}/{slug}\n");
        output.push_str(&format!("api_base = {}\n", toml_string(&self.source.api_base)));
        output.push_str(&format!("endpoint = {}\n", toml_string(&self.source.endpoint)));
        output.push_str("# Unit the source reports APY in: \"percent\" (3.45) or \"fraction\" (0.0345)\n");
        output.push_str(&format!("apy_unit = \"{}\"\n\n", self.source.apy_unit.as_str()));

        output.push_str("[fetch]\n");
        output.push_str("# Per-request timeout and the budget for all attempts of one fetch\n");
        output.push_str(&format!("request_timeout_secs = {}\n", self.fetch.request_timeout_secs));
        output.push_str(&format!("total_budget_secs = {}\n", self.fetch.total_budget_secs));
        output.push_str("# Total attempts for timeouts, 5xx and connection errors (4xx is never retried)\n");
        output.push_str(&format!("max_attempts = {}\n", self.fetch.max_attempts));
        output.push_str("# Backoff doubles after every failed attempt, up to max_backoff_ms\n");
        output.push_str(&format!("base_backoff_ms = {}\n", self.fetch.base_backoff_ms));
        output.push_str(&format!("max_backoff_ms = {}\n\n", self.fetch.max_backoff_ms));

        output.push_str("[thresholds]\n");
        output.push_str("# All thresholds are fractions: 0.20 = 20%\n");
        output.push_str("# Critical when TVL falls by at least this much over the lookback window\n");
        output.push_str(&format!("tvl_drop_pct = {}\n", self.thresholds.tvl_drop_pct));
        output.push_str("# Warning when the 7-day APY is below this\n");
        output.push_str(&format!("apy_low_pct = {}\n", self.thresholds.apy_low_pct));
        output.push_str("# Warning when utilization (lending protocols only) is above this\n");
        output.push_str(&format!("utilization_high_pct = {}\n\n", self.thresholds.utilization_high_pct));

        output.push_str("[thresholds.lookback]\n");
        output.push_str("# The prior snapshot is the one closest to target_hours ago,\n");
        output.push_str("# accepted only when it is between min_hours and max_hours old\n");
        output.push_str(&format!("target_hours = {}\n", self.thresholds.lookback.target_hours));
        output.push_str(&format!("min_hours = {}\n", self.thresholds.lookback.min_hours));
        output.push_str(&format!("max_hours = {}\n\n", self.thresholds.lookback.max_hours));

        output.push_str("[pipeline]\n");
        output.push_str("# Protocols processed concurrently\n");
        output.push_str(&format!("workers = {}\n", self.pipeline.workers));
        output.push_str("# Snapshot timestamps are floored to this interval\n");
        output.push_str(&format!("cycle_interval_secs = {}\n\n", self.pipeline.cycle_interval_secs));

        output.push_str("[notifier]\n");
        output.push_str("# Slack-compatible webhook; alerts are only logged when unset\n");
        match &self.notifier.webhook_url {
            Some(url) => output.push_str(&format!("webhook_url = {}\n", toml_string(url))),
            None => output.push_str("# webhook_url = \"https://hooks.slack.com/services/...\"\n"),
        }
        output.push_str(&format!("timeout_secs = {}\n", self.notifier.timeout_secs));

        for protocol in &self.protocols {
            output.push_str("\n[[protocols]]\n");
            output.push_str(&format!("name = {}\n", toml_string(&protocol.name)));
            output.push_str(&format!("display_name = {}\n", toml_string(&protocol.display_name)));
            output.push_str(&format!("slug = {}\n", toml_string(&protocol.slug)));
            output.push_str(&format!("kind = \"{}\"\n", protocol.kind.as_str()));
        }

        output
    }
}

fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
