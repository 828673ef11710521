//! Deployment engine for flowmesh step flows.
//!
//! Turns an ordered list of stored step objects into a running
//! event-driven pipeline on Kubernetes, proves it works by pushing one
//! event through it, and removes it again on request.

#![warn(clippy::pedantic)]

pub mod assemble;
pub mod change;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod launch;
pub mod orchestrator;
pub mod poll;
pub mod preflight;
pub mod progress;
pub mod provision;
pub mod prune;
pub mod readiness;
pub mod request;
pub mod resolve;
pub mod resources;
pub mod result_json;
pub mod teardown;
pub mod verify;

// Re-export public API for convenience
pub use cluster::{ClusterClient, ClusterError, InMemoryCluster, KubeCluster, ResourceKind};
pub use config::FlowmeshConfig;
pub use errors::FlowError;
pub use orchestrator::{FlowPlan, Orchestrator};
pub use progress::ProgressReporter;
pub use request::{DeleteRequest, DeployRequest, UnitTestRequest};
