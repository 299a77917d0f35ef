use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use rusqlite::Connection;
use std::path::Path;
use std::str::FromStr;

use crate::storage::migrations::apply_migrations;
use crate::storage::PersistenceError;

/// SQLite-backed snapshot and alert store.
///
/// The connection sits behind a mutex; every store call holds it for a single
/// statement (or a single history page), never across calls.
pub struct Database {
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &"<SQLite Connection>")
            .finish()
    }
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        let connection = Connection::open(path)
            .with_context(|| format!("Failed to open database at: {}", path.display()))?;

        connection
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = memory;
        ",
            )
            .context("Failed to configure SQLite pragmas")?;

        Self::with_connection(connection)
    }

    pub fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(connection)
    }

    fn with_connection(mut connection: Connection) -> Result<Self> {
        apply_migrations(&mut connection).context("Failed to apply database migrations")?;
        Ok(Database {
            connection: Mutex::new(connection),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock()
    }
}

// Fixed-width RFC 3339 text so lexical order matches chronological order.

pub(crate) fn encode_snapshot_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn encode_alert_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_time(column: &'static str, value: String) -> Result<DateTime<Utc>, PersistenceError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) => Err(PersistenceError::Decode { column, value }),
    }
}

pub(crate) fn encode_decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

pub(crate) fn decode_decimal(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<Decimal>, PersistenceError> {
    match value {
        None => Ok(None),
        Some(text) => Decimal::from_str(&text)
            .map(Some)
            .map_err(|_| PersistenceError::Decode { column, value: text }),
    }
}
