//! Per-cycle orchestration of fetch, normalize, persist, evaluate and alert

pub mod orchestrator;

pub use orchestrator::{
    CycleStatus, CycleSummary, Pipeline, PipelineDeps, ProtocolOutcome, ProtocolResult, Stage, StageFailure,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{LogNotifier, Notifier, WebhookNotifier};
use crate::config::{Config, NotifierConfig};
use crate::ingest::{HttpMetricsSource, SystemClock};
use crate::storage::Database;

/// Webhook delivery when a URL is configured, log output otherwise.
pub fn notifier_from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.clone(), Duration::from_secs(config.timeout_secs))
                .context("Failed to build webhook notifier")?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::info!("No webhook configured, alerts will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Wire the production pipeline: HTTP source, system clock, SQLite stores.
pub fn build_pipeline(config: &Config, db: Arc<Database>) -> Result<Pipeline> {
    let source = HttpMetricsSource::new(&config.source).context("Failed to build HTTP client")?;
    let notifier = notifier_from_config(&config.notifier)?;

    Ok(Pipeline::new(
        config,
        PipelineDeps {
            source: Arc::new(source),
            clock: Arc::new(SystemClock),
            snapshots: db.clone(),
            alerts: db,
            notifier,
        },
    ))
}
