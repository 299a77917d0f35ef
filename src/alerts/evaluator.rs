use rust_decimal::Decimal;

use crate::alerts::thresholds::ThresholdConfig;
use crate::models::{AlertCandidate, AlertType, ProtocolSnapshot, Severity};
use crate::utils::{format_pct, format_usd};

/// Compares a protocol's newest snapshot (and its lookback snapshot)
/// against the configured thresholds.
///
/// Evaluation is a pure function of its inputs. Deduplication against alerts
/// that are already open happens in the alert store, not here.
#[derive(Debug, Clone)]
pub struct AnomalyEvaluator {
    thresholds: ThresholdConfig,
}

impl AnomalyEvaluator {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Run every rule and return the candidates in a fixed order:
    /// tvl_drop, apy_low, utilization_high.
    pub fn evaluate(
        &self,
        protocol: &str,
        latest: &ProtocolSnapshot,
        prior: Option<&ProtocolSnapshot>,
    ) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();

        if let Some(candidate) = self.check_tvl_drop(protocol, latest, prior) {
            candidates.push(candidate);
        }
        if let Some(candidate) = self.check_apy_low(protocol, latest) {
            candidates.push(candidate);
        }
        if let Some(candidate) = self.check_utilization_high(protocol, latest) {
            candidates.push(candidate);
        }

        candidates
    }

    fn check_tvl_drop(
        &self,
        protocol: &str,
        latest: &ProtocolSnapshot,
        prior: Option<&ProtocolSnapshot>,
    ) -> Option<AlertCandidate> {
        let Some(prior) = prior else {
            tracing::debug!(protocol, "No lookback snapshot, skipping TVL drop check");
            return None;
        };
        let previous = prior.tvl_usd?;
        let current = latest.tvl_usd?;
        let drop = tvl_drop_ratio(previous, current)?;

        if drop < self.thresholds.tvl_drop_pct {
            return None;
        }

        tracing::debug!(protocol, drop = %drop, "TVL drop threshold crossed");
        Some(AlertCandidate {
            protocol_name: protocol.to_string(),
            alert_type: AlertType::TvlDrop,
            severity: Severity::Critical,
            message: format!(
                "TVL dropped {} in {}h (from {} to {})",
                format_pct(drop),
                self.thresholds.lookback.target_hours,
                format_usd(previous),
                format_usd(current)
            ),
            triggered_at: latest.timestamp,
            observed: drop,
            threshold: self.thresholds.tvl_drop_pct,
        })
    }

    fn check_apy_low(&self, protocol: &str, latest: &ProtocolSnapshot) -> Option<AlertCandidate> {
        let apy = latest.apy_7d?;
        if apy >= self.thresholds.apy_low_pct {
            return None;
        }

        tracing::debug!(protocol, apy = %apy, "APY below threshold");
        Some(AlertCandidate {
            protocol_name: protocol.to_string(),
            alert_type: AlertType::ApyLow,
            severity: Severity::Warning,
            message: format!(
                "APY below threshold: {} (threshold: {})",
                format_pct(apy),
                format_pct(self.thresholds.apy_low_pct)
            ),
            triggered_at: latest.timestamp,
            observed: apy,
            threshold: self.thresholds.apy_low_pct,
        })
    }

    fn check_utilization_high(&self, protocol: &str, latest: &ProtocolSnapshot) -> Option<AlertCandidate> {
        let utilization = latest.utilization_rate?;
        if utilization <= self.thresholds.utilization_high_pct {
            return None;
        }

        tracing::debug!(protocol, utilization = %utilization, "Utilization above threshold");
        Some(AlertCandidate {
            protocol_name: protocol.to_string(),
            alert_type: AlertType::UtilizationHigh,
            severity: Severity::Warning,
            message: format!(
                "Utilization rate high: {} (threshold: {})",
                format_pct(utilization),
                format_pct(self.thresholds.utilization_high_pct)
            ),
            triggered_at: latest.timestamp,
            observed: utilization,
            threshold: self.thresholds.utilization_high_pct,
        })
    }
}

/// Fractional drop from `previous` to `current`. `None` when `previous` is
/// zero, since no meaningful percentage exists.
pub fn tvl_drop_ratio(previous: Decimal, current: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return None;
    }
    (previous - current).checked_div(previous)
}
