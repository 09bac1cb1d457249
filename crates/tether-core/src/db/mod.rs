//! SQLite state database utilities.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so readers (the CLI) never block the engine
//! - `busy_timeout = 5s` to ride out transient lock contention
//! - `synchronous = NORMAL`

pub mod migrations;
pub mod schema;

use crate::error::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Busy timeout used for state DB connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the state database.
///
/// Every call takes the connection lock for the duration of one closure; no
/// caller holds it across an `.await`.
#[derive(Debug, Clone)]
pub struct StateDb {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

/// Open (or create) the state database, apply runtime pragmas, and migrate
/// schema to the latest version.
pub fn open_state_db(path: &Path) -> Result<StateDb, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Setup(format!("create state db directory {}: {e}", parent.display()))
        })?;
    }

    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    tracing::debug!(path = %path.display(), "state database ready");

    Ok(StateDb {
        conn: Arc::new(Mutex::new(conn)),
        path: Some(path.to_path_buf()),
    })
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

impl StateDb {
    /// In-memory database with the full schema. Used by tests and ephemeral engines.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection.
    pub fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let conn = self.conn.lock().map_err(|_: PoisonError<_>| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Run `f` inside one transaction, committing only when it succeeds.
    pub fn with_tx<R>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut conn = self.conn.lock().map_err(|_: PoisonError<_>| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| Ok(migrations::current_schema_version(conn)?))
    }
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(us: i64) -> Result<DateTime<Utc>, StoreError> {
    let secs = us.div_euclid(1_000_000);
    let nanos = u32::try_from(us.rem_euclid(1_000_000) * 1_000)
        .map_err(|e| StoreError::Setup(format!("timestamp {us}: {e}")))?;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| StoreError::Setup(format!("timestamp {us} out of range")))
}
