use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::{AlertCandidate, AlertStatus, AlertType, ProtocolAlert, Severity};
use crate::storage::sqlite::{decode_time, encode_alert_time, Database};
use crate::storage::PersistenceError;

/// Result of offering a candidate to the alert store.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub created: bool,
    /// The stored alert, present only when `created` is true
    pub alert: Option<ProtocolAlert>,
}

impl CreateOutcome {
    fn suppressed() -> Self {
        Self {
            created: false,
            alert: None,
        }
    }
}

/// Persistence for alerts. At most one alert per (protocol, type) is open.
pub trait AlertStore: Send + Sync {
    /// Store the candidate unless an open alert of the same protocol and type
    /// exists. The check and the insert are a single statement.
    fn create_if_new(&self, candidate: &AlertCandidate) -> Result<CreateOutcome, PersistenceError>;

    /// Newest first
    fn list(&self, status: AlertStatus) -> Result<Vec<ProtocolAlert>, PersistenceError>;

    fn list_for_protocol(&self, protocol: &str, status: AlertStatus) -> Result<Vec<ProtocolAlert>, PersistenceError>;

    fn get(&self, id: i64) -> Result<Option<ProtocolAlert>, PersistenceError>;

    /// Mark an open alert resolved. False when the alert is unknown or
    /// already resolved.
    fn resolve(&self, id: i64, at: DateTime<Utc>) -> Result<bool, PersistenceError>;
}

const SELECT_ALERTS: &str = "SELECT id, protocol_name, alert_type, severity, message, triggered_at, resolved_at
     FROM protocol_alerts";

type RawAlert = (i64, String, String, String, String, String, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawAlert> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_row(raw: RawAlert) -> Result<ProtocolAlert, PersistenceError> {
    let (id, protocol_name, alert_type, severity, message, triggered_at, resolved_at) = raw;

    let alert_type = alert_type
        .parse::<AlertType>()
        .map_err(|_| PersistenceError::Decode {
            column: "alert_type",
            value: alert_type.clone(),
        })?;
    let severity = severity
        .parse::<Severity>()
        .map_err(|_| PersistenceError::Decode {
            column: "severity",
            value: severity.clone(),
        })?;

    Ok(ProtocolAlert {
        id,
        protocol_name,
        alert_type,
        severity,
        message,
        triggered_at: decode_time("triggered_at", triggered_at)?,
        resolved_at: resolved_at.map(|ts| decode_time("resolved_at", ts)).transpose()?,
    })
}

impl Database {
    fn query_alerts(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ProtocolAlert>, PersistenceError> {
        let raw: Vec<RawAlert> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, read_row)?;
            rows.collect::<Result<_, _>>()?
        };

        raw.into_iter().map(decode_row).collect()
    }
}

fn status_filter(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Open => "resolved_at IS NULL",
        AlertStatus::All => "1 = 1",
    }
}

impl AlertStore for Database {
    fn create_if_new(&self, candidate: &AlertCandidate) -> Result<CreateOutcome, PersistenceError> {
        let conn = self.conn();

        let inserted = conn.execute(
            "INSERT INTO protocol_alerts (protocol_name, alert_type, severity, message, triggered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING",
            params![
                candidate.protocol_name,
                candidate.alert_type.as_str(),
                candidate.severity.as_str(),
                candidate.message,
                encode_alert_time(&candidate.triggered_at),
            ],
        )?;

        if inserted != 1 {
            tracing::debug!(
                protocol = %candidate.protocol_name,
                alert_type = %candidate.alert_type,
                "Open alert already exists, suppressing"
            );
            return Ok(CreateOutcome::suppressed());
        }

        let alert = ProtocolAlert {
            id: conn.last_insert_rowid(),
            protocol_name: candidate.protocol_name.clone(),
            alert_type: candidate.alert_type,
            severity: candidate.severity,
            message: candidate.message.clone(),
            triggered_at: candidate.triggered_at,
            resolved_at: None,
        };

        Ok(CreateOutcome {
            created: true,
            alert: Some(alert),
        })
    }

    fn list(&self, status: AlertStatus) -> Result<Vec<ProtocolAlert>, PersistenceError> {
        let sql = format!(
            "{SELECT_ALERTS} WHERE {} ORDER BY triggered_at DESC, id DESC",
            status_filter(status)
        );
        self.query_alerts(&sql, &[])
    }

    fn list_for_protocol(&self, protocol: &str, status: AlertStatus) -> Result<Vec<ProtocolAlert>, PersistenceError> {
        let sql = format!(
            "{SELECT_ALERTS} WHERE protocol_name = ?1 AND {} ORDER BY triggered_at DESC, id DESC",
            status_filter(status)
        );
        self.query_alerts(&sql, &[&protocol])
    }

    fn get(&self, id: i64) -> Result<Option<ProtocolAlert>, PersistenceError> {
        let raw = self
            .conn()
            .query_row(&format!("{SELECT_ALERTS} WHERE id = ?1"), [id], read_row)
            .optional()?;

        raw.map(decode_row).transpose()
    }

    fn resolve(&self, id: i64, at: DateTime<Utc>) -> Result<bool, PersistenceError> {
        let updated = self.conn().execute(
            "UPDATE protocol_alerts SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
            params![encode_alert_time(&at), id],
        )?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
    }

    fn candidate(protocol: &str, alert_type: AlertType, triggered_at: DateTime<Utc>) -> AlertCandidate {
        AlertCandidate {
            protocol_name: protocol.to_string(),
            alert_type,
            severity: Severity::Warning,
            message: format!("{alert_type} on {protocol}"),
            triggered_at,
            observed: Decimal::ONE,
            threshold: Decimal::ONE,
        }
    }

    #[test]
    fn test_create_returns_stored_alert() {
        let db = Database::in_memory().unwrap();
        let outcome = db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(12))).unwrap();

        assert!(outcome.created);
        let alert = outcome.alert.unwrap();
        assert!(alert.is_open());
        assert_eq!(db.get(alert.id).unwrap(), Some(alert));
    }

    #[test]
    fn test_open_alert_suppresses_duplicate() {
        let db = Database::in_memory().unwrap();
        assert!(db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(12))).unwrap().created);

        let second = db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(13))).unwrap();
        assert!(!second.created);
        assert!(second.alert.is_none());

        let open = db.list_for_protocol("aave-v3", AlertStatus::Open).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].triggered_at, at(12));
    }

    #[test]
    fn test_dedup_is_per_protocol_and_type() {
        let db = Database::in_memory().unwrap();
        assert!(db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(12))).unwrap().created);
        assert!(db.create_if_new(&candidate("aave-v3", AlertType::ApyLow, at(12))).unwrap().created);
        assert!(db.create_if_new(&candidate("compound-v3", AlertType::TvlDrop, at(12))).unwrap().created);
        assert_eq!(db.list(AlertStatus::Open).unwrap().len(), 3);
    }

    #[test]
    fn test_resolve_allows_new_alert() {
        let db = Database::in_memory().unwrap();
        let first = db
            .create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(12)))
            .unwrap()
            .alert
            .unwrap();

        assert!(db.resolve(first.id, at(14)).unwrap());
        assert!(!db.resolve(first.id, at(15)).unwrap());
        assert!(!db.resolve(9999, at(15)).unwrap());

        let resolved = db.get(first.id).unwrap().unwrap();
        assert_eq!(resolved.resolved_at, Some(at(14)));

        let second = db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(16))).unwrap();
        assert!(second.created);

        assert_eq!(db.list(AlertStatus::Open).unwrap().len(), 1);
        assert_eq!(db.list(AlertStatus::All).unwrap().len(), 2);
    }

    #[test]
    fn test_list_is_newest_first() {
        let db = Database::in_memory().unwrap();
        db.create_if_new(&candidate("aave-v3", AlertType::ApyLow, at(9))).unwrap();
        db.create_if_new(&candidate("compound-v3", AlertType::ApyLow, at(11))).unwrap();
        db.create_if_new(&candidate("aave-v3", AlertType::TvlDrop, at(11))).unwrap();

        let alerts = db.list(AlertStatus::All).unwrap();
        let order: Vec<(String, AlertType)> = alerts
            .iter()
            .map(|a| (a.protocol_name.clone(), a.alert_type))
            .collect();
        assert_eq!(
            order,
            vec![
                ("aave-v3".to_string(), AlertType::TvlDrop),
                ("compound-v3".to_string(), AlertType::ApyLow),
                ("aave-v3".to_string(), AlertType::ApyLow),
            ]
        );
    }

    #[test]
    fn test_concurrent_creates_yield_one_open_alert() {
        let db = Arc::new(Database::in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let triggered = at(12) + Duration::minutes(i);
                    db.create_if_new(&candidate("aave-v3", AlertType::UtilizationHigh, triggered))
                        .unwrap()
                        .created
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(db.list(AlertStatus::Open).unwrap().len(), 1);
    }
}
