// Snapshot and alert persistence
pub mod alerts;
pub mod migrations;
pub mod snapshots;
pub mod sqlite;

pub use alerts::{AlertStore, CreateOutcome};
pub use snapshots::{HistoryIter, SnapshotHistory, SnapshotStore};
pub use sqlite::Database;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value in column `{column}` could not be decoded: {value:?}")]
    Decode { column: &'static str, value: String },
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::models::{AlertCandidate, AlertStatus, AlertType, ProtocolSnapshot, Severity};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    #[test]
    fn test_database_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("monitor.db");
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let db = Database::new(&db_path).unwrap();
        db.upsert(&ProtocolSnapshot::new("aave-v3", ts).with_tvl(Decimal::from(100)))
            .unwrap();
        db.create_if_new(&AlertCandidate {
            protocol_name: "aave-v3".to_string(),
            alert_type: AlertType::ApyLow,
            severity: Severity::Warning,
            message: "APY below threshold".to_string(),
            triggered_at: ts,
            observed: Decimal::ZERO,
            threshold: Decimal::ONE,
        })
        .unwrap();
        drop(db);

        let reopened = Database::new(&db_path).unwrap();
        assert_eq!(reopened.count("aave-v3").unwrap(), 1);
        assert_eq!(reopened.list(AlertStatus::Open).unwrap().len(), 1);
    }
}
