//! `SQLite`-backed implementation of [`ObjectStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use flowmesh_types::ids::ObjectId;
use flowmesh_types::step::StepObject;
use rusqlite::{Connection, OptionalExtension};

use crate::backend::ObjectStore;
use crate::error::{self, StoreError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for the graph tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS flows (
    f_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    latest_run TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    o_id INTEGER PRIMARY KEY,
    type TEXT NOT NULL DEFAULT 'step',
    x REAL NOT NULL DEFAULT 0,
    y REAL NOT NULL DEFAULT 0,
    label TEXT NOT NULL DEFAULT '',
    params TEXT,
    target TEXT,
    flow INTEGER REFERENCES flows(f_id)
);

CREATE INDEX IF NOT EXISTS idx_objects_flow ON objects (flow);
";

/// `SQLite`-backed object storage.
///
/// Create with [`SqliteObjectStore::open`] for a file-backed database
/// or [`SqliteObjectStore::in_memory`] for tests and local runs.
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
}

impl SqliteObjectStore {
    /// Open or create a `SQLite` database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created,
    /// or [`StoreError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the schema can't be created.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(StoreError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert or replace a flow row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on write failure.
    pub fn insert_flow(&self, flow_id: i64, name: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO flows (f_id, name) VALUES (?1, ?2) \
             ON CONFLICT (f_id) DO UPDATE SET name = excluded.name",
            rusqlite::params![flow_id, name],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    /// Insert or replace a step object, optionally attached to a flow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on write failure.
    pub fn insert_object(&self, object: &StepObject, flow_id: Option<i64>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO objects (o_id, label, params, flow) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (o_id) DO UPDATE SET label = excluded.label, \
             params = excluded.params, flow = excluded.flow",
            rusqlite::params![object.id.get(), object.label, object.params, flow_id],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    /// Read back a flow's latest run timestamp as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on read failure.
    pub fn latest_run(&self, flow_id: i64) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        let stamp: Option<Option<String>> = conn
            .query_row(
                "SELECT latest_run FROM flows WHERE f_id = ?1",
                [flow_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)?;
        Ok(stamp.flatten())
    }
}

impl ObjectStore for SqliteObjectStore {
    fn find_object(&self, id: ObjectId) -> error::Result<Option<StepObject>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT o_id, label, params FROM objects WHERE o_id = ?1",
                [id.get()],
                |row| {
                    let id: i64 = row.get(0)?;
                    let label: String = row.get(1)?;
                    let params: Option<String> = row.get(2)?;
                    Ok((id, label, params))
                },
            )
            .optional()
            .map_err(StoreError::backend)?;

        Ok(row.map(|(id, label, params)| StepObject {
            id: ObjectId(id),
            label,
            params,
        }))
    }

    fn record_latest_run(&self, flow_id: i64, at: DateTime<Utc>) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE flows SET latest_run = ?1 WHERE f_id = ?2",
                rusqlite::params![at.format(SQLITE_DATETIME_FMT).to_string(), flow_id],
            )
            .map_err(StoreError::backend)?;
        Ok(updated > 0)
    }
}
