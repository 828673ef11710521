//! Shared handler state and the registry of in-flight operations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use flowmesh_engine::Orchestrator;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub operations: Arc<OperationRegistry>,
    /// Cancelled when the server starts draining.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            operations: Arc::new(OperationRegistry::default()),
            shutdown: CancellationToken::new(),
        }
    }
}

/// One operation currently running on this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInfo {
    pub op_id: String,
    pub op: String,
    pub user: String,
    pub flow_id: String,
    pub started_at: DateTime<Utc>,
}

/// In-flight deploys, kicks, and unit tests, each with its cancellation token.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    active: Mutex<BTreeMap<String, (OperationInfo, CancellationToken)>>,
}

impl OperationRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, (OperationInfo, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new operation. Dropping the handle cancels and forgets it.
    pub fn register(self: &Arc<Self>, op: &str, user: &str, flow_id: &str) -> OperationHandle {
        let info = OperationInfo {
            op_id: uuid::Uuid::new_v4().to_string(),
            op: op.to_string(),
            user: user.to_string(),
            flow_id: flow_id.to_string(),
            started_at: Utc::now(),
        };
        let cancel = CancellationToken::new();
        let op_id = info.op_id.clone();
        self.lock().insert(op_id.clone(), (info, cancel.clone()));
        debug!(op_id = %op_id, op, user, flow_id, "Operation registered");
        OperationHandle {
            op_id,
            cancel,
            registry: Arc::clone(self),
        }
    }

    /// Active operations, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<OperationInfo> {
        let mut ops: Vec<_> = self.lock().values().map(|(info, _)| info.clone()).collect();
        ops.sort_by_key(|info| info.started_at);
        ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every active operation. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for (_, cancel) in active.values() {
            cancel.cancel();
        }
        active.len()
    }

    fn finish(&self, op_id: &str) {
        if self.lock().remove(op_id).is_some() {
            debug!(op_id, "Operation finished");
        }
    }
}

/// Registration of one operation.
#[derive(Debug)]
pub struct OperationHandle {
    op_id: String,
    cancel: CancellationToken,
    registry: Arc<OperationRegistry>,
}

impl OperationHandle {
    #[must_use]
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.finish(&self.op_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_drop_cancels_and_forgets() {
        let registry = Arc::new(OperationRegistry::default());
        let handle = registry.register("deploy", "alice", "7");
        let token = handle.cancel_token();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].flow_id, "7");
        assert_eq!(registry.list()[0].op_id, handle.op_id());

        drop(handle);
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let registry = Arc::new(OperationRegistry::default());
        let a = registry.register("deploy", "alice", "1");
        let b = registry.register("test", "bob", "2");
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
        assert_eq!(registry.len(), 2);
    }
}
