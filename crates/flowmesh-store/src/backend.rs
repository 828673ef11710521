//! Object store trait definition.
//!
//! Persistence of flows and graph objects is owned elsewhere. flowmesh only
//! reads step objects and stamps when a flow last ran.

use chrono::{DateTime, Utc};
use flowmesh_types::ids::ObjectId;
use flowmesh_types::step::StepObject;

use crate::error;

/// Storage contract consumed by the step assembler and deploy path.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ObjectStore>`.
pub trait ObjectStore: Send + Sync {
    /// Fetch one step object by primary key.
    ///
    /// Returns `Ok(None)` when no object has that id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::error::StoreError) on storage failure.
    fn find_object(&self, id: ObjectId) -> error::Result<Option<StepObject>>;

    /// Stamp the latest run time of a persisted flow.
    ///
    /// Returns `false` when no flow row has that id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::error::StoreError) on storage failure.
    fn record_latest_run(&self, flow_id: i64, at: DateTime<Utc>) -> error::Result<bool>;
}
