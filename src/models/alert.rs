use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TvlDrop,
    ApyLow,
    UtilizationHigh,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::TvlDrop => "tvl_drop",
            AlertType::ApyLow => "apy_low",
            AlertType::UtilizationHigh => "utilization_high",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tvl_drop" => Ok(AlertType::TvlDrop),
            "apy_low" => Ok(AlertType::ApyLow),
            "utilization_high" => Ok(AlertType::UtilizationHigh),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Filter for alert listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Open,
    All,
}

/// An alert produced by the evaluator that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertCandidate {
    pub protocol_name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    /// Observed value that crossed the threshold (drop ratio for TVL).
    pub observed: Decimal,
    pub threshold: Decimal,
}

/// A persisted alert. Open while `resolved_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolAlert {
    pub id: i64,
    pub protocol_name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ProtocolAlert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Payload handed to notifiers once an alert has been stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub alert_id: i64,
    pub protocol: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl From<&ProtocolAlert> for AlertEvent {
    fn from(alert: &ProtocolAlert) -> Self {
        Self {
            alert_id: alert.id,
            protocol: alert.protocol_name.clone(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            message: alert.message.clone(),
            triggered_at: alert.triggered_at,
        }
    }
}
