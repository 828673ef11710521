//! `PostgreSQL`-backed implementation of [`ObjectStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. Callers on an async runtime go through
//! `spawn_blocking`.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use flowmesh_types::ids::ObjectId;
use flowmesh_types::step::StepObject;
use postgres::{Client, NoTls};

use crate::backend::ObjectStore;
use crate::error::{self, StoreError};

/// Idempotent DDL for the graph tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS flows (
    f_id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    latest_run TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS objects (
    o_id BIGSERIAL PRIMARY KEY,
    type TEXT NOT NULL DEFAULT 'step',
    x DOUBLE PRECISION NOT NULL DEFAULT 0,
    y DOUBLE PRECISION NOT NULL DEFAULT 0,
    label TEXT NOT NULL DEFAULT '',
    params TEXT,
    target TEXT,
    flow BIGINT REFERENCES flows(f_id)
);

CREATE INDEX IF NOT EXISTS idx_objects_flow ON objects (flow);
";

/// `PostgreSQL`-backed object storage.
///
/// Create with [`PostgresObjectStore::open`] providing a libpq-style
/// connection string or URI (e.g. `"postgresql://flowmesh@localhost/graph"`).
pub struct PostgresObjectStore {
    client: Mutex<Client>,
}

impl PostgresObjectStore {
    /// Connect and make sure the graph tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client = Client::connect(connstr, NoTls).map_err(StoreError::backend)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(StoreError::backend)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ObjectStore for PostgresObjectStore {
    fn find_object(&self, id: ObjectId) -> error::Result<Option<StepObject>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT o_id, label, params FROM objects WHERE o_id = $1",
                &[&id.get()],
            )
            .map_err(StoreError::backend)?;

        Ok(rows.first().map(|row| StepObject {
            id: ObjectId(row.get(0)),
            label: row.get::<_, Option<String>>(1).unwrap_or_default(),
            params: row.get(2),
        }))
    }

    fn record_latest_run(&self, flow_id: i64, at: DateTime<Utc>) -> error::Result<bool> {
        let mut client = self.lock_client()?;
        let updated = client
            .execute(
                "UPDATE flows SET latest_run = $1::TEXT::TIMESTAMPTZ WHERE f_id = $2",
                &[&at.to_rfc3339(), &flow_id],
            )
            .map_err(StoreError::backend)?;
        Ok(updated > 0)
    }
}
