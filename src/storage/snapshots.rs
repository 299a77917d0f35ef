use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::VecDeque;

use crate::alerts::thresholds::LookbackWindow;
use crate::models::ProtocolSnapshot;
use crate::storage::sqlite::{decode_decimal, decode_time, encode_decimal, encode_snapshot_time, Database};
use crate::storage::PersistenceError;

const HISTORY_PAGE_SIZE: usize = 256;

pub type HistoryIter<'a> = Box<dyn Iterator<Item = Result<ProtocolSnapshot, PersistenceError>> + Send + 'a>;

/// Persistence for protocol snapshots, keyed by (protocol, timestamp).
pub trait SnapshotStore: Send + Sync {
    /// Insert or overwrite the snapshot stored under the same key.
    fn upsert(&self, snapshot: &ProtocolSnapshot) -> Result<(), PersistenceError>;

    fn latest(&self, protocol: &str) -> Result<Option<ProtocolSnapshot>, PersistenceError>;

    /// Snapshots no older than `since`, oldest first. Each call starts a
    /// fresh read.
    fn history<'a>(&'a self, protocol: &str, since: DateTime<Utc>) -> HistoryIter<'a>;

    fn count(&self, protocol: &str) -> Result<usize, PersistenceError>;

    /// The snapshot to compare `reference` against, picked from the window.
    fn prior(
        &self,
        protocol: &str,
        reference: DateTime<Utc>,
        window: &LookbackWindow,
    ) -> Result<Option<ProtocolSnapshot>, PersistenceError> {
        let (start, end) = window.bounds(reference);

        let mut candidates = Vec::new();
        for snapshot in self.history(protocol, start) {
            let snapshot = snapshot?;
            if snapshot.timestamp > end {
                break;
            }
            candidates.push(snapshot);
        }

        Ok(window.closest(reference, candidates))
    }
}

/// Lazy, time-ordered walk over one protocol's snapshots.
///
/// Rows are read a page at a time using the last seen timestamp as the
/// cursor, so the database lock is only held while a page loads.
pub struct SnapshotHistory<'a> {
    db: &'a Database,
    protocol: String,
    since: String,
    cursor: Option<String>,
    buffer: VecDeque<ProtocolSnapshot>,
    exhausted: bool,
}

impl<'a> SnapshotHistory<'a> {
    pub fn new(db: &'a Database, protocol: &str, since: DateTime<Utc>) -> Self {
        Self {
            db,
            protocol: protocol.to_string(),
            since: encode_snapshot_time(&since),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn load_page(&mut self) -> Result<(), PersistenceError> {
        let db = self.db;
        let cursor = self.cursor.clone();
        let conn = db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT protocol_name, timestamp, tvl_usd, apy_7d, utilization_rate
             FROM protocol_snapshots
             WHERE protocol_name = ?1 AND timestamp >= ?2 AND (?3 IS NULL OR timestamp > ?3)
             ORDER BY timestamp ASC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![self.protocol, self.since, cursor, HISTORY_PAGE_SIZE as i64],
            read_row,
        )?;

        let mut loaded = 0;
        for row in rows {
            let snapshot = decode_row(row?)?;
            self.cursor = Some(encode_snapshot_time(&snapshot.timestamp));
            self.buffer.push_back(snapshot);
            loaded += 1;
        }

        if loaded < HISTORY_PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for SnapshotHistory<'_> {
    type Item = Result<ProtocolSnapshot, PersistenceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.load_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

type RawRow = (String, String, Option<String>, Option<String>, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_row(raw: RawRow) -> Result<ProtocolSnapshot, PersistenceError> {
    let (protocol_name, timestamp, tvl_usd, apy_7d, utilization_rate) = raw;
    Ok(ProtocolSnapshot {
        protocol_name,
        timestamp: decode_time("timestamp", timestamp)?,
        tvl_usd: decode_decimal("tvl_usd", tvl_usd)?,
        apy_7d: decode_decimal("apy_7d", apy_7d)?,
        utilization_rate: decode_decimal("utilization_rate", utilization_rate)?,
    })
}

impl SnapshotStore for Database {
    fn upsert(&self, snapshot: &ProtocolSnapshot) -> Result<(), PersistenceError> {
        self.conn().execute(
            "INSERT INTO protocol_snapshots (protocol_name, timestamp, tvl_usd, apy_7d, utilization_rate)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(protocol_name, timestamp) DO UPDATE SET
                tvl_usd = excluded.tvl_usd,
                apy_7d = excluded.apy_7d,
                utilization_rate = excluded.utilization_rate",
            params![
                snapshot.protocol_name,
                encode_snapshot_time(&snapshot.timestamp),
                encode_decimal(snapshot.tvl_usd),
                encode_decimal(snapshot.apy_7d),
                encode_decimal(snapshot.utilization_rate),
            ],
        )?;
        Ok(())
    }

    fn latest(&self, protocol: &str) -> Result<Option<ProtocolSnapshot>, PersistenceError> {
        let raw = self
            .conn()
            .query_row(
                "SELECT protocol_name, timestamp, tvl_usd, apy_7d, utilization_rate
                 FROM protocol_snapshots
                 WHERE protocol_name = ?1
                 ORDER BY timestamp DESC
                 LIMIT 1",
                [protocol],
                read_row,
            )
            .optional()?;

        raw.map(decode_row).transpose()
    }

    fn history<'a>(&'a self, protocol: &str, since: DateTime<Utc>) -> HistoryIter<'a> {
        Box::new(SnapshotHistory::new(self, protocol, since))
    }

    fn count(&self, protocol: &str) -> Result<usize, PersistenceError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM protocol_snapshots WHERE protocol_name = ?1",
            [protocol],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn hourly(db: &Database, protocol: &str, hours: i64) {
        for h in 0..hours {
            let snapshot = ProtocolSnapshot::new(protocol, base() + Duration::hours(h))
                .with_tvl(Decimal::from(1000 + h));
            db.upsert(&snapshot).unwrap();
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let snapshot = ProtocolSnapshot::new("aave-v3", base())
            .with_tvl(dec("50000000000"))
            .with_apy(dec("0.05"));

        db.upsert(&snapshot).unwrap();
        db.upsert(&snapshot).unwrap();

        assert_eq!(db.count("aave-v3").unwrap(), 1);
        assert_eq!(db.latest("aave-v3").unwrap(), Some(snapshot));
    }

    #[test]
    fn test_upsert_overwrites_values() {
        let db = Database::in_memory().unwrap();
        db.upsert(&ProtocolSnapshot::new("aave-v3", base()).with_tvl(dec("100")).with_apy(dec("0.05")))
            .unwrap();
        db.upsert(&ProtocolSnapshot::new("aave-v3", base()).with_tvl(dec("90"))).unwrap();

        let stored = db.latest("aave-v3").unwrap().unwrap();
        assert_eq!(stored.tvl_usd, Some(dec("90")));
        assert_eq!(stored.apy_7d, None);
        assert_eq!(db.count("aave-v3").unwrap(), 1);
    }

    #[test]
    fn test_latest_is_per_protocol() {
        let db = Database::in_memory().unwrap();
        hourly(&db, "aave-v3", 3);

        assert_eq!(
            db.latest("aave-v3").unwrap().unwrap().timestamp,
            base() + Duration::hours(2)
        );
        assert!(db.latest("compound-v3").unwrap().is_none());
    }

    #[test]
    fn test_history_pages_in_order() {
        let db = Database::in_memory().unwrap();
        let total = HISTORY_PAGE_SIZE as i64 + 44;
        hourly(&db, "aave-v3", total);
        hourly(&db, "compound-v3", 5);

        let snapshots: Vec<ProtocolSnapshot> = db
            .history("aave-v3", base())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(snapshots.len() as i64, total);
        assert!(snapshots.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(snapshots.iter().all(|s| s.protocol_name == "aave-v3"));
    }

    #[test]
    fn test_history_since_is_inclusive_and_restartable() {
        let db = Database::in_memory().unwrap();
        hourly(&db, "aave-v3", 10);

        let since = base() + Duration::hours(7);
        let first: Vec<_> = db.history("aave-v3", since).map(|s| s.unwrap().timestamp).collect();
        let second: Vec<_> = db.history("aave-v3", since).map(|s| s.unwrap().timestamp).collect();

        assert_eq!(first.len(), 3);
        assert_eq!(first[0], since);
        assert_eq!(first, second);
    }

    #[test]
    fn test_history_is_lazy() {
        let db = Database::in_memory().unwrap();
        hourly(&db, "aave-v3", 3);

        let mut history = db.history("aave-v3", base());
        assert!(history.next().is_some());
        // The lock is released between pages, so writes still go through.
        db.upsert(&ProtocolSnapshot::new("aave-v3", base() + Duration::hours(100))).unwrap();
        assert_eq!(history.count(), 2);
    }

    #[test]
    fn test_prior_picks_closest_in_window() {
        let db = Database::in_memory().unwrap();
        hourly(&db, "aave-v3", 48);

        let reference = base() + Duration::hours(47);
        let prior = db
            .prior("aave-v3", reference, &LookbackWindow::default())
            .unwrap()
            .unwrap();
        assert_eq!(prior.timestamp, base() + Duration::hours(23));
    }

    #[test]
    fn test_prior_with_gap_falls_back_within_window() {
        let db = Database::in_memory().unwrap();
        let reference = base() + Duration::hours(48);
        db.upsert(&ProtocolSnapshot::new("aave-v3", reference - Duration::hours(21))).unwrap();
        db.upsert(&ProtocolSnapshot::new("aave-v3", reference - Duration::hours(30))).unwrap();

        let prior = db
            .prior("aave-v3", reference, &LookbackWindow::default())
            .unwrap()
            .unwrap();
        assert_eq!(prior.timestamp, reference - Duration::hours(21));
    }

    #[test]
    fn test_prior_none_without_history() {
        let db = Database::in_memory().unwrap();
        let reference = base() + Duration::hours(48);
        db.upsert(&ProtocolSnapshot::new("aave-v3", reference)).unwrap();

        assert!(db
            .prior("aave-v3", reference, &LookbackWindow::default())
            .unwrap()
            .is_none());
    }
}
