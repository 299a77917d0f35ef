use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{ProtocolConfig, ProtocolKind};
use crate::models::ProtocolSnapshot;

const TVL_FIELDS: &[&str] = &["tvl_usd", "tvlUsd", "tvl"];
const APY_FIELDS: &[&str] = &["apy_7d", "apy7d", "apy"];
const UTILIZATION_FIELDS: &[&str] = &["utilization_rate", "utilizationRate", "utilization"];

/// Unit the data source reports APY in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApyUnit {
    /// 3.45 means 3.45%
    #[default]
    Percent,
    /// 0.0345 means 3.45%
    Fraction,
}

impl ApyUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApyUnit::Percent => "percent",
            ApyUnit::Fraction => "fraction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed response: expected a number or an object, got {0}")]
    UnexpectedShape(&'static str),

    #[error("malformed response: field `{field}` {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed response: negative TVL {0}")]
    NegativeTvl(Decimal),

    #[error("malformed response: utilization rate {0} outside [0, 1]")]
    UtilizationOutOfRange(Decimal),
}

/// Maps raw source payloads into snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    apy_unit: ApyUnit,
}

impl Normalizer {
    pub fn new(apy_unit: ApyUnit) -> Self {
        Self { apy_unit }
    }

    /// Build the snapshot for `protocol` at the given cycle instant.
    ///
    /// Fields the source leaves out stay `None`; a reported zero stays zero.
    pub fn normalize(
        &self,
        protocol: &ProtocolConfig,
        payload: &Value,
        cycle_at: DateTime<Utc>,
    ) -> Result<ProtocolSnapshot, NormalizeError> {
        let mut snapshot = ProtocolSnapshot::new(protocol.name.clone(), cycle_at);

        match payload {
            // Bare number: the TVL-only shape
            Value::Number(_) => {
                snapshot.tvl_usd = to_decimal("tvl", payload)?;
            }
            Value::Object(fields) => {
                snapshot.tvl_usd = first_field(fields, "tvl", TVL_FIELDS)?;
                snapshot.apy_7d = first_field(fields, "apy", APY_FIELDS)?.map(|apy| match self.apy_unit {
                    ApyUnit::Percent => apy / Decimal::ONE_HUNDRED,
                    ApyUnit::Fraction => apy,
                });
                snapshot.utilization_rate = first_field(fields, "utilization", UTILIZATION_FIELDS)?;
            }
            Value::Array(_) => return Err(NormalizeError::UnexpectedShape("array")),
            Value::String(_) => return Err(NormalizeError::UnexpectedShape("string")),
            Value::Bool(_) => return Err(NormalizeError::UnexpectedShape("bool")),
            Value::Null => return Err(NormalizeError::UnexpectedShape("null")),
        }

        if let Some(tvl) = snapshot.tvl_usd {
            if tvl.is_sign_negative() && !tvl.is_zero() {
                return Err(NormalizeError::NegativeTvl(tvl));
            }
        }

        if let Some(utilization) = snapshot.utilization_rate {
            if utilization < Decimal::ZERO || utilization > Decimal::ONE {
                return Err(NormalizeError::UtilizationOutOfRange(utilization));
            }
        }

        if protocol.kind != ProtocolKind::Lending && snapshot.utilization_rate.is_some() {
            tracing::debug!(protocol = %protocol.name, "Dropping utilization for non-lending protocol");
            snapshot.utilization_rate = None;
        }

        if snapshot.is_empty() {
            tracing::warn!(protocol = %protocol.name, "Source reported no known metrics");
        }

        Ok(snapshot)
    }
}

fn first_field(
    fields: &Map<String, Value>,
    label: &'static str,
    aliases: &[&str],
) -> Result<Option<Decimal>, NormalizeError> {
    match aliases.iter().find_map(|alias| fields.get(*alias)) {
        Some(value) => to_decimal(label, value),
        None => Ok(None),
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .ok()
        .or_else(|| Decimal::from_scientific(text).ok())
}

/// Coerce a JSON number or numeric string. `null` and blank strings are absent.
fn to_decimal(field: &'static str, value: &Value) -> Result<Option<Decimal>, NormalizeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| NormalizeError::InvalidField {
                field,
                reason: format!("is not representable as a decimal: {n}"),
            }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            parse_decimal(trimmed)
                .map(Some)
                .ok_or_else(|| NormalizeError::InvalidField {
                    field,
                    reason: format!("is not numeric: {s:?}"),
                })
        }
        other => Err(NormalizeError::InvalidField {
            field,
            reason: format!("has unsupported type: {}", json_type(other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Floor `now` to a multiple of `interval` since the Unix epoch, so every
/// ingestion within one cycle gets the same timestamp.
pub fn truncate_to_cycle(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs() as i64;
    if step <= 0 {
        return now;
    }
    let secs = now.timestamp();
    let floored = secs - secs.rem_euclid(step);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lending() -> ProtocolConfig {
        ProtocolConfig {
            name: "aave-v3".to_string(),
            display_name: "Aave V3".to_string(),
            slug: "aave-v3".to_string(),
            kind: ProtocolKind::Lending,
        }
    }

    fn cycle() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_bare_number_is_tvl() {
        let snapshot = Normalizer::default()
            .normalize(&lending(), &json!(1234567.89), cycle())
            .unwrap();
        assert_eq!(snapshot.tvl_usd, Some(dec("1234567.89")));
        assert!(snapshot.apy_7d.is_none());
        assert_eq!(snapshot.timestamp, cycle());
    }

    #[test]
    fn test_object_with_numeric_strings() {
        let payload = json!({"tvl": "9876543.21", "apy": "3.45", "utilization": "0.7250"});
        let snapshot = Normalizer::new(ApyUnit::Percent)
            .normalize(&lending(), &payload, cycle())
            .unwrap();
        assert_eq!(snapshot.tvl_usd, Some(dec("9876543.21")));
        assert_eq!(snapshot.apy_7d, Some(dec("0.0345")));
        assert_eq!(snapshot.utilization_rate, Some(dec("0.725")));
    }

    #[test]
    fn test_fraction_apy_unit_is_untouched() {
        let payload = json!({"apy_7d": 0.05});
        let snapshot = Normalizer::new(ApyUnit::Fraction)
            .normalize(&lending(), &payload, cycle())
            .unwrap();
        assert_eq!(snapshot.apy_7d, Some(dec("0.05")));
    }

    #[test]
    fn test_missing_fields_are_null_and_zero_stays_zero() {
        let payload = json!({"tvlUsd": 0, "apy7d": null});
        let snapshot = Normalizer::default().normalize(&lending(), &payload, cycle()).unwrap();
        assert_eq!(snapshot.tvl_usd, Some(Decimal::ZERO));
        assert!(snapshot.apy_7d.is_none());
        assert!(snapshot.utilization_rate.is_none());
    }

    #[test]
    fn test_utilization_out_of_range_is_malformed() {
        let payload = json!({"utilization_rate": 1.2});
        let err = Normalizer::default().normalize(&lending(), &payload, cycle()).unwrap_err();
        assert_eq!(err, NormalizeError::UtilizationOutOfRange(dec("1.2")));
    }

    #[test]
    fn test_negative_tvl_is_malformed() {
        let err = Normalizer::default()
            .normalize(&lending(), &json!({"tvl": -5}), cycle())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::NegativeTvl(_)));
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let err = Normalizer::default()
            .normalize(&lending(), &json!({"tvl": "lots"}), cycle())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidField { field: "tvl", .. }));

        let err = Normalizer::default()
            .normalize(&lending(), &json!({"apy": [1, 2]}), cycle())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidField { field: "apy", .. }));
    }

    #[test]
    fn test_unexpected_shapes() {
        for payload in [json!([1, 2]), json!("100"), json!(true), json!(null)] {
            assert!(matches!(
                Normalizer::default().normalize(&lending(), &payload, cycle()),
                Err(NormalizeError::UnexpectedShape(_))
            ));
        }
    }

    #[test]
    fn test_non_lending_drops_utilization() {
        let mut dex = lending();
        dex.kind = ProtocolKind::Dex;
        let snapshot = Normalizer::default()
            .normalize(&dex, &json!({"tvl": 10, "utilization": 0.5}), cycle())
            .unwrap();
        assert!(snapshot.utilization_rate.is_none());
    }

    #[test]
    fn test_scientific_notation() {
        let snapshot = Normalizer::default()
            .normalize(&lending(), &json!({"tvl": "5e10"}), cycle())
            .unwrap();
        assert_eq!(snapshot.tvl_usd, Some(dec("50000000000")));
    }

    #[test]
    fn test_values_beyond_decimal_scale_are_malformed() {
        let err = Normalizer::default()
            .normalize(&lending(), &json!({"tvl": "1e-40"}), cycle())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidField { field: "tvl", .. }));
    }

    #[test]
    fn test_truncate_to_cycle() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap();
        assert_eq!(
            truncate_to_cycle(now, Duration::from_secs(3600)),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            truncate_to_cycle(now, Duration::from_secs(900)),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
        assert_eq!(truncate_to_cycle(now, Duration::ZERO), now);
    }
}
