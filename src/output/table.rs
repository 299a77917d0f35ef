use serde::Serialize;
use tabled::{Table, Tabled};

use crate::models::{ProtocolAlert, ProtocolSnapshot};
use crate::pipeline::{CycleSummary, ProtocolOutcome, ProtocolResult};
use crate::utils::{format_optional_pct, format_optional_usd, format_timestamp};

/// Trait for items that can be displayed as tables or JSON
pub trait OutputFormat {
    fn to_table(&self) -> String;
    fn to_json(&self) -> Result<String, serde_json::Error>;
}

#[derive(Tabled, Serialize, Debug)]
pub struct AlertRow {
    #[tabled(rename = "ID")]
    pub id: i64,
    #[tabled(rename = "Protocol")]
    pub protocol: String,
    #[tabled(rename = "Type")]
    pub alert_type: String,
    #[tabled(rename = "Severity")]
    pub severity: String,
    #[tabled(rename = "Triggered")]
    pub triggered_at: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl AlertRow {
    pub fn from_alert(alert: &ProtocolAlert) -> Self {
        Self {
            id: alert.id,
            protocol: alert.protocol_name.clone(),
            alert_type: alert.alert_type.to_string(),
            severity: alert.severity.to_string(),
            triggered_at: format_timestamp(&alert.triggered_at),
            status: match &alert.resolved_at {
                None => "open".to_string(),
                Some(at) => format!("resolved {}", format_timestamp(at)),
            },
            message: alert.message.clone(),
        }
    }
}

#[derive(Tabled, Serialize, Debug)]
pub struct SnapshotRow {
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
    #[tabled(rename = "TVL")]
    pub tvl: String,
    #[tabled(rename = "APY (7d)")]
    pub apy: String,
    #[tabled(rename = "Utilization")]
    pub utilization: String,
}

impl SnapshotRow {
    pub fn from_snapshot(snapshot: &ProtocolSnapshot) -> Self {
        Self {
            timestamp: format_timestamp(&snapshot.timestamp),
            tvl: format_optional_usd(snapshot.tvl_usd),
            apy: format_optional_pct(snapshot.apy_7d),
            utilization: format_optional_pct(snapshot.utilization_rate),
        }
    }
}

#[derive(Tabled, Serialize, Debug)]
pub struct OutcomeRow {
    #[tabled(rename = "Protocol")]
    pub protocol: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "TVL")]
    pub tvl: String,
    #[tabled(rename = "New Alerts")]
    pub alerts: usize,
    #[tabled(rename = "Details")]
    pub details: String,
}

impl OutcomeRow {
    pub fn from_outcome(outcome: &ProtocolOutcome) -> Self {
        match &outcome.result {
            ProtocolResult::Done {
                snapshot,
                alerts_created,
                notifications_failed,
            } => Self {
                protocol: outcome.protocol.clone(),
                result: "ok".to_string(),
                tvl: format_optional_usd(snapshot.tvl_usd),
                alerts: alerts_created.len(),
                details: if *notifications_failed > 0 {
                    format!("{notifications_failed} notification(s) failed")
                } else {
                    String::new()
                },
            },
            ProtocolResult::Failed {
                failure,
                alerts_created,
            } => Self {
                protocol: outcome.protocol.clone(),
                result: format!("failed ({})", failure.stage),
                tvl: "-".to_string(),
                alerts: alerts_created.len(),
                details: failure.reason.clone(),
            },
        }
    }
}

impl OutputFormat for Vec<ProtocolAlert> {
    fn to_table(&self) -> String {
        if self.is_empty() {
            return "No alerts found.".to_string();
        }

        let rows: Vec<AlertRow> = self.iter().map(AlertRow::from_alert).collect();
        Table::new(rows).to_string()
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl OutputFormat for Vec<ProtocolSnapshot> {
    fn to_table(&self) -> String {
        if self.is_empty() {
            return "No snapshots found.".to_string();
        }

        let rows: Vec<SnapshotRow> = self.iter().map(SnapshotRow::from_snapshot).collect();
        Table::new(rows).to_string()
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl OutputFormat for CycleSummary {
    fn to_table(&self) -> String {
        let header = format!(
            "Cycle {} at {}: {} succeeded, {} failed, {} new alert(s)",
            self.run_id,
            format_timestamp(&self.cycle_at),
            self.succeeded(),
            self.failed(),
            self.alerts_created()
        );

        if self.outcomes.is_empty() {
            return format!("{header}\nNo protocols configured.");
        }

        let rows: Vec<OutcomeRow> = self.outcomes.iter().map(OutcomeRow::from_outcome).collect();
        format!("{header}\n{}", Table::new(rows))
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
