use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One timestamped reading of a protocol's metrics.
///
/// Ratios are fractions: an `apy_7d` of 0.05 is 5%. A `None` field means the
/// source did not report it, which is distinct from a reading of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub protocol_name: String,
    pub timestamp: DateTime<Utc>,
    pub tvl_usd: Option<Decimal>,
    pub apy_7d: Option<Decimal>,
    pub utilization_rate: Option<Decimal>,
}

impl ProtocolSnapshot {
    pub fn new(protocol_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            timestamp,
            tvl_usd: None,
            apy_7d: None,
            utilization_rate: None,
        }
    }

    pub fn with_tvl(mut self, tvl_usd: Decimal) -> Self {
        self.tvl_usd = Some(tvl_usd);
        self
    }

    pub fn with_apy(mut self, apy_7d: Decimal) -> Self {
        self.apy_7d = Some(apy_7d);
        self
    }

    pub fn with_utilization(mut self, utilization_rate: Decimal) -> Self {
        self.utilization_rate = Some(utilization_rate);
        self
    }

    /// True when the source reported none of the tracked metrics.
    pub fn is_empty(&self) -> bool {
        self.tvl_usd.is_none() && self.apy_7d.is_none() && self.utilization_rate.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_keeps_missing_fields_null() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snapshot = ProtocolSnapshot::new("aave-v3", ts).with_tvl(Decimal::ZERO);

        assert_eq!(snapshot.tvl_usd, Some(Decimal::ZERO));
        assert!(snapshot.apy_7d.is_none());
        assert!(snapshot.utilization_rate.is_none());
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_empty_snapshot() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(ProtocolSnapshot::new("aave-v3", ts).is_empty());
    }
}
