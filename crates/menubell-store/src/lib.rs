//! # Menubell Store
//! SQLite-backed persistence. All shared state between the scheduler loop,
//! webhook handlers, and operator endpoints lives here — never in process
//! memory. One connection behind a mutex, WAL mode for concurrent readers.

mod campaigns;
mod conversations;
mod migrate;
mod reminders;

pub use conversations::NewMessage;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use menubell_core::{MenubellError, Result};
use rusqlite::Connection;

/// Persistent storage for all Menubell data.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| MenubellError::db(format!("DB open: {e}")))?;
        // WAL for concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("📦 Store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MenubellError::db(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MenubellError::db(format!("Lock: {e}")))
    }
}

/// RFC 3339 TEXT is the storage format for every timestamp column.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|d| d.with_timezone(&Utc))
}
