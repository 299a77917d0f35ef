use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::alerts::{AnomalyEvaluator, Notifier};
use crate::config::{Config, ProtocolConfig};
use crate::ingest::{truncate_to_cycle, Clock, Fetcher, MetricsSource, Normalizer, RetryPolicy};
use crate::models::{AlertEvent, ProtocolAlert, ProtocolSnapshot};
use crate::storage::{AlertStore, CreateOutcome, SnapshotStore};

/// Steps every protocol goes through, in order, within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetching,
    Normalizing,
    Persisting,
    Evaluating,
    Alerting,
    Notifying,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Persisting => "persisting",
            Stage::Evaluating => "evaluating",
            Stage::Alerting => "alerting",
            Stage::Notifying => "notifying",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{stage} failed: {reason}")]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProtocolResult {
    Done {
        snapshot: ProtocolSnapshot,
        alerts_created: Vec<ProtocolAlert>,
        notifications_failed: usize,
    },
    Failed {
        failure: StageFailure,
        /// Alerts stored before the failing stage. They are still notified.
        alerts_created: Vec<ProtocolAlert>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolOutcome {
    pub protocol: String,
    pub result: ProtocolResult,
}

impl ProtocolOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.result, ProtocolResult::Done { .. })
    }

    pub fn alerts_created(&self) -> &[ProtocolAlert] {
        match &self.result {
            ProtocolResult::Done { alerts_created, .. } | ProtocolResult::Failed { alerts_created, .. } => {
                alerts_created
            }
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.result {
            ProtocolResult::Failed { failure, .. } => Some(failure),
            ProtocolResult::Done { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    PartialFailure,
    Failed,
}

impl CycleStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            CycleStatus::Success => 0,
            CycleStatus::PartialFailure => 1,
            CycleStatus::Failed => 2,
        }
    }
}

/// Result of one cycle; outcomes are in configuration order.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub cycle_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ProtocolOutcome>,
}

impl CycleSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn alerts_created(&self) -> usize {
        self.outcomes.iter().map(|o| o.alerts_created().len()).sum()
    }

    pub fn status(&self) -> CycleStatus {
        match (self.succeeded(), self.failed()) {
            (_, 0) => CycleStatus::Success,
            (0, _) => CycleStatus::Failed,
            _ => CycleStatus::PartialFailure,
        }
    }
}

/// Collaborators the pipeline talks to. Everything with I/O sits behind a
/// trait object so it can be swapped out.
pub struct PipelineDeps {
    pub source: Arc<dyn MetricsSource>,
    pub clock: Arc<dyn Clock>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Runs ingestion, evaluation and alerting for every configured protocol.
pub struct Pipeline {
    protocols: Vec<ProtocolConfig>,
    fetcher: Fetcher,
    normalizer: Normalizer,
    evaluator: AnomalyEvaluator,
    snapshots: Arc<dyn SnapshotStore>,
    alerts: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    workers: usize,
    cycle_interval: Duration,
}

impl Pipeline {
    pub fn new(config: &Config, deps: PipelineDeps) -> Self {
        Self {
            protocols: config.protocols.clone(),
            fetcher: Fetcher::new(deps.source, Arc::clone(&deps.clock), RetryPolicy::from(&config.fetch)),
            normalizer: Normalizer::new(config.source.apy_unit),
            evaluator: AnomalyEvaluator::new(config.thresholds.clone()),
            snapshots: deps.snapshots,
            alerts: deps.alerts,
            notifier: deps.notifier,
            clock: deps.clock,
            workers: config.pipeline.workers.max(1),
            cycle_interval: Duration::from_secs(config.pipeline.cycle_interval_secs),
        }
    }

    pub fn protocols(&self) -> &[ProtocolConfig] {
        &self.protocols
    }

    /// Process every protocol once. A failure in one protocol never stops
    /// the others; the cycle itself cannot fail.
    pub async fn run_cycle(&self) -> CycleSummary {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let cycle_at = truncate_to_cycle(started_at, self.cycle_interval);

        tracing::info!(
            run_id = %run_id,
            cycle_at = %cycle_at,
            protocols = self.protocols.len(),
            workers = self.workers,
            "Starting cycle"
        );

        let protocols = self.protocols.clone();
        let mut indexed: Vec<(usize, ProtocolOutcome)> = stream::iter(protocols.into_iter().enumerate())
            .map(|(index, protocol)| async move { (index, self.process(&protocol, cycle_at).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let summary = CycleSummary {
            run_id,
            cycle_at,
            started_at,
            finished_at: self.clock.now(),
            outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        tracing::info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            alerts_created = summary.alerts_created(),
            status = ?summary.status(),
            "Cycle finished"
        );

        summary
    }

    /// Run a cycle on every tick of `every` until `shutdown` resolves. A cycle
    /// in progress always completes before shutdown is observed.
    pub async fn run_forever<S, F>(&self, every: Duration, shutdown: S, mut on_cycle: F) -> usize
    where
        S: Future<Output = ()>,
        F: FnMut(&CycleSummary),
    {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(cycles, "Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.run_cycle().await;
                    cycles += 1;
                    on_cycle(&summary);
                }
            }
        }

        cycles
    }

    async fn process(&self, protocol: &ProtocolConfig, cycle_at: DateTime<Utc>) -> ProtocolOutcome {
        let result = self
            .run_stages(protocol, cycle_at)
            .await
            .unwrap_or_else(|failure| ProtocolResult::Failed {
                failure,
                alerts_created: Vec::new(),
            });

        if let ProtocolResult::Failed { failure, alerts_created } = &result {
            tracing::error!(
                protocol = %protocol.name,
                stage = %failure.stage,
                reason = %failure.reason,
                alerts_created = alerts_created.len(),
                "Protocol failed"
            );
        }

        ProtocolOutcome {
            protocol: protocol.name.clone(),
            result,
        }
    }

    async fn run_stages(
        &self,
        protocol: &ProtocolConfig,
        cycle_at: DateTime<Utc>,
    ) -> Result<ProtocolResult, StageFailure> {
        let name = protocol.name.as_str();

        let payload = self
            .fetcher
            .fetch(protocol)
            .await
            .map_err(|e| StageFailure::new(Stage::Fetching, e))?;

        let snapshot = self
            .normalizer
            .normalize(protocol, &payload, cycle_at)
            .map_err(|e| StageFailure::new(Stage::Normalizing, e))?;

        self.snapshots
            .upsert(&snapshot)
            .map_err(|e| StageFailure::new(Stage::Persisting, e))?;
        tracing::debug!(protocol = name, timestamp = %snapshot.timestamp, "Snapshot stored");

        let prior = self
            .snapshots
            .prior(name, snapshot.timestamp, &self.evaluator.thresholds().lookback)
            .map_err(|e| StageFailure::new(Stage::Evaluating, e))?;
        let candidates = self.evaluator.evaluate(name, &snapshot, prior.as_ref());

        let mut created = Vec::new();
        let mut alerting_failure = None;
        for candidate in &candidates {
            match self.alerts.create_if_new(candidate) {
                Ok(CreateOutcome { alert: Some(alert), .. }) => {
                    tracing::info!(
                        protocol = name,
                        alert_id = alert.id,
                        alert_type = %alert.alert_type,
                        severity = %alert.severity,
                        observed = %candidate.observed,
                        threshold = %candidate.threshold,
                        "Alert created"
                    );
                    created.push(alert);
                }
                Ok(_) => {}
                Err(error) => {
                    alerting_failure = Some(StageFailure::new(Stage::Alerting, error));
                    break;
                }
            }
        }

        // Alerts stored before an insert failure are delivered too
        let notifications_failed = self.notify_all(name, &created).await;

        if let Some(failure) = alerting_failure {
            return Ok(ProtocolResult::Failed {
                failure,
                alerts_created: created,
            });
        }

        tracing::info!(
            protocol = name,
            candidates = candidates.len(),
            alerts_created = created.len(),
            "Protocol done"
        );

        Ok(ProtocolResult::Done {
            snapshot,
            alerts_created: created,
            notifications_failed,
        })
    }

    /// Deliver each alert, returning how many deliveries failed.
    async fn notify_all(&self, protocol: &str, alerts: &[ProtocolAlert]) -> usize {
        let mut failed = 0;
        for alert in alerts {
            if let Err(error) = self.notifier.notify(&AlertEvent::from(alert)).await {
                failed += 1;
                tracing::warn!(
                    protocol,
                    alert_id = alert.id,
                    stage = %Stage::Notifying,
                    error = %error,
                    "Notification failed"
                );
            }
        }
        failed
    }
}
