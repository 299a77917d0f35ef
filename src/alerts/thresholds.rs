use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ProtocolSnapshot;

/// Threshold values the evaluator compares snapshots against.
///
/// Loaded once with the rest of the configuration and handed to the
/// evaluator by value; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Fractional TVL drop over the lookback window that raises a critical alert (0.20 = 20%)
    pub tvl_drop_pct: Decimal,
    /// APY below this fraction raises a warning (0.02 = 2%)
    pub apy_low_pct: Decimal,
    /// Utilization above this fraction raises a warning (0.95 = 95%)
    pub utilization_high_pct: Decimal,
    #[serde(default)]
    pub lookback: LookbackWindow,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            tvl_drop_pct: Decimal::new(20, 2),
            apy_low_pct: Decimal::new(2, 2),
            utilization_high_pct: Decimal::new(95, 2),
            lookback: LookbackWindow::default(),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tvl_drop_pct <= Decimal::ZERO || self.tvl_drop_pct > Decimal::ONE {
            anyhow::bail!("thresholds.tvl_drop_pct must be in (0, 1], got {}", self.tvl_drop_pct);
        }
        if self.utilization_high_pct < Decimal::ZERO || self.utilization_high_pct > Decimal::ONE {
            anyhow::bail!(
                "thresholds.utilization_high_pct must be in [0, 1], got {}",
                self.utilization_high_pct
            );
        }
        self.lookback.validate()
    }
}

/// Age range in which a prior snapshot is accepted for the TVL comparison.
///
/// Cycles drift, so the "24h ago" snapshot is the one closest to
/// `target_hours` before the reference, as long as it is between
/// `min_hours` and `max_hours` old.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub target_hours: u32,
    pub min_hours: u32,
    pub max_hours: u32,
}

impl Default for LookbackWindow {
    fn default() -> Self {
        Self {
            target_hours: 24,
            min_hours: 20,
            max_hours: 28,
        }
    }
}

impl LookbackWindow {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_hours <= self.target_hours && self.target_hours <= self.max_hours) {
            anyhow::bail!(
                "lookback window must satisfy min_hours <= target_hours <= max_hours (got {} / {} / {})",
                self.min_hours,
                self.target_hours,
                self.max_hours
            );
        }
        Ok(())
    }

    /// Oldest and newest acceptable timestamps, inclusive.
    pub fn bounds(&self, reference: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            reference - Duration::hours(self.max_hours as i64),
            reference - Duration::hours(self.min_hours as i64),
        )
    }

    pub fn target(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        reference - Duration::hours(self.target_hours as i64)
    }

    /// Pick the snapshot closest to the target inside the window.
    /// Ties go to the older snapshot.
    pub fn closest<I>(&self, reference: DateTime<Utc>, candidates: I) -> Option<ProtocolSnapshot>
    where
        I: IntoIterator<Item = ProtocolSnapshot>,
    {
        let (start, end) = self.bounds(reference);
        let target = self.target(reference);

        let mut best: Option<(Duration, ProtocolSnapshot)> = None;
        for snapshot in candidates {
            if snapshot.timestamp < start || snapshot.timestamp > end {
                continue;
            }
            let distance = if snapshot.timestamp >= target {
                snapshot.timestamp - target
            } else {
                target - snapshot.timestamp
            };
            let better = match &best {
                None => true,
                Some((best_distance, best_snapshot)) => {
                    distance < *best_distance
                        || (distance == *best_distance && snapshot.timestamp < best_snapshot.timestamp)
                }
            };
            if better {
                best = Some((distance, snapshot));
            }
        }

        best.map(|(_, snapshot)| snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hours_ago: i64) -> ProtocolSnapshot {
        let reference = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        ProtocolSnapshot::new("aave-v3", reference - Duration::hours(hours_ago))
    }

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_default_thresholds() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(thresholds.tvl_drop_pct.to_string(), "0.20");
        assert_eq!(thresholds.apy_low_pct.to_string(), "0.02");
        assert_eq!(thresholds.utilization_high_pct.to_string(), "0.95");
        assert!(thresholds.validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.tvl_drop_pct = Decimal::ZERO;
        assert!(thresholds.validate().is_err());

        let mut thresholds = ThresholdConfig::default();
        thresholds.lookback.min_hours = 30;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_closest_prefers_nearest_to_target() {
        let window = LookbackWindow::default();
        let picked = window
            .closest(reference(), vec![at(27), at(25), at(22)])
            .unwrap();
        assert_eq!(picked.timestamp, at(25).timestamp);
    }

    #[test]
    fn test_closest_ignores_out_of_window() {
        let window = LookbackWindow::default();
        assert!(window.closest(reference(), vec![at(30), at(19), at(1)]).is_none());
    }

    #[test]
    fn test_closest_tie_goes_to_older() {
        let window = LookbackWindow::default();
        let picked = window.closest(reference(), vec![at(22), at(26)]).unwrap();
        assert_eq!(picked.timestamp, at(26).timestamp);
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let window = LookbackWindow::default();
        assert!(window.closest(reference(), vec![at(28)]).is_some());
        assert!(window.closest(reference(), vec![at(20)]).is_some());
    }
}
