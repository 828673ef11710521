//! Flow operation error model.

use flowmesh_store::StoreError;
use flowmesh_types::ids::ObjectId;

use crate::cluster::{ClusterError, ResourceKind};

/// Categorized error for deploy, kick, unit-test, and teardown operations.
///
/// Client errors (`Validation`, `NotFound`, `InvalidParams`) are reported
/// synchronously before any cluster work starts. The rest surface through
/// the progress stream or as a failed verification.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Request failed structural checks. Carries every problem found.
    #[error("validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    /// A referenced step object does not exist.
    #[error("object not found: id={0}")]
    NotFound(ObjectId),

    /// A step object's stored parameter blob is not valid JSON.
    #[error("invalid params JSON for object id={id}: {reason}")]
    InvalidParams { id: ObjectId, reason: String },

    /// The offline dry run rejected the flow, or could not run at all.
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// Creating or replacing a flow resource failed.
    #[error("provisioning {kind} {name} failed: {source}")]
    Provision {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ClusterError,
    },

    /// A resource did not report Ready before its deadline.
    #[error("{kind} not Ready -> {name}")]
    ReadinessTimeout { kind: ResourceKind, name: String },

    /// A disposable job or log expectation did not complete in time.
    #[error("{0}")]
    VerifyTimeout(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller went away before the operation finished.
    #[error("operation cancelled")]
    Cancelled,
}

impl FlowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Stable machine-readable category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Preflight(_) => "preflight_failure",
            Self::Provision { .. } => "provision_error",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::VerifyTimeout(_) => "verify_timeout",
            Self::Cluster(_) => "cluster_error",
            Self::Store(_) => "store_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the caller's request, not the system, is at fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::InvalidParams { .. }
        )
    }
}
