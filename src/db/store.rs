//! SQLite transition history store.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::monitor::{Status, TransitionEvent};

use super::models::TransitionRecord;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("corrupt status value: {0:?}")]
    CorruptStatus(String),
}

/// Thread-safe transition history store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the history database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Apply the embedded schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// Append a transition, unless the store's last record for this address
    /// already carries the same `to_status`.
    ///
    /// The dedup check makes appends safe under at-least-once delivery and
    /// enforces the no-consecutive-duplicates invariant. Returns whether a
    /// row was actually written.
    pub fn append_transition(&self, event: &TransitionEvent) -> Result<bool, DbError> {
        if self.last_status(&event.address)? == Some(event.to) {
            return Ok(false);
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transitions (address, from_status, to_status, occurred_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.address,
                event.from.as_str(),
                event.to.as_str(),
                event.occurred_at.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
            ],
        )?;
        Ok(true)
    }

    /// Ordered transition records for an address within a time range.
    pub fn transitions_between(
        &self,
        address: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransitionRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, address, from_status, to_status, occurred_at FROM transitions
             WHERE address = ?1 AND occurred_at >= ?2 AND occurred_at < ?3
             ORDER BY occurred_at ASC, id ASC",
        )?;

        let records = stmt
            .query_map(
                params![
                    address,
                    start.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
                    end.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
                ],
                row_to_record,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    /// Last stored status for an address, if any history exists.
    pub fn last_status(&self, address: &str) -> Result<Option<Status>, DbError> {
        let conn = self.conn.lock().unwrap();
        let last: Option<String> = conn
            .query_row(
                "SELECT to_status FROM transitions WHERE address = ?1 ORDER BY id DESC LIMIT 1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;

        match last {
            Some(s) => Status::parse(&s)
                .map(Some)
                .ok_or(DbError::CorruptStatus(s)),
            None => Ok(None),
        }
    }

    /// Total number of stored transitions, for the status footer.
    pub fn transition_count(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM transitions", [], |r| r.get(0))?)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> SqlResult<TransitionRecord> {
    let from_str: String = row.get(2)?;
    let to_str: String = row.get(3)?;
    let time_str: String = row.get(4)?;

    Ok(TransitionRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        from_status: Status::parse(&from_str).unwrap_or(Status::Unknown),
        to_status: Status::parse(&to_str).unwrap_or(Status::Unknown),
        occurred_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
