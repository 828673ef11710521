//! Caller-facing request shapes and their structural validation.

use flowmesh_types::ids::{FlowId, ObjectId, UserId};
use flowmesh_types::progress::Operation;
use flowmesh_types::step::StepSpec;
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

/// Marker every step source must contain.
pub const HANDLE_SIGNATURE: &str = "def handle(";

/// Deploy or kick a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default, alias = "flow_id")]
    pub flow_id: String,
    #[serde(default)]
    pub steps: Vec<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, alias = "create_namespace_if_missing")]
    pub create_namespace_if_missing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verify_timeout_seconds")]
    pub verify_timeout_seconds: Option<u64>,
}

/// Tear a flow down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default, alias = "flow_id")]
    pub flow_id: String,
}

/// Run one step's handler in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTestRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default, alias = "flow_id")]
    pub flow_id: String,
    #[serde(default)]
    pub test: Option<ObjectId>,
    /// Sample event as JSON text. Missing or empty means syntax check only.
    #[serde(default, alias = "test_input")]
    pub test_input: Option<String>,
}

/// Resolved knobs of a deploy/kick run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    pub op: Operation,
    pub create_namespace_if_missing: bool,
    pub verify_timeout_seconds: u64,
}

impl DeployRequest {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId::new(self.user.trim())
    }

    #[must_use]
    pub fn flow(&self) -> FlowId {
        FlowId::new(self.flow_id.trim())
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        self.user_id().namespace()
    }

    /// Options carried by the request body.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] for an unknown `op`.
    pub fn options(&self, default_timeout_seconds: u64) -> Result<DeployOptions, FlowError> {
        let op = self
            .op
            .as_deref()
            .unwrap_or_default()
            .parse::<Operation>()
            .map_err(FlowError::validation)?;
        Ok(DeployOptions {
            op,
            create_namespace_if_missing: self.create_namespace_if_missing,
            verify_timeout_seconds: self
                .verify_timeout_seconds
                .filter(|t| *t > 0)
                .unwrap_or(default_timeout_seconds),
        })
    }
}

impl DeleteRequest {
    #[must_use]
    pub fn flow(&self) -> FlowId {
        FlowId::new(self.flow_id.trim())
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        UserId::new(self.user.trim()).namespace()
    }

    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] naming every problem.
    pub fn validate(&self) -> Result<(), FlowError> {
        finish(identity_errors(&self.user, &self.flow_id))
    }
}

impl UnitTestRequest {
    #[must_use]
    pub fn flow(&self) -> FlowId {
        FlowId::new(self.flow_id.trim())
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        UserId::new(self.user.trim()).namespace()
    }

    /// The sample event, unless only a syntax check was asked for.
    #[must_use]
    pub fn sample_event(&self) -> Option<&str> {
        self.test_input.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] naming every problem.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut errors = Vec::new();
        check_name_part("user", &self.user, &mut errors);
        if self.test.is_none() {
            errors.push("test object ID is required".to_string());
        }
        finish(errors)
    }
}

fn check_name_part(field: &str, value: &str, errors: &mut Vec<String>) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(format!("{field} is required"));
    } else if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        errors.push(format!(
            "{field} '{value}' may only contain lowercase letters, digits, and '-'"
        ));
    }
}

fn identity_errors(user: &str, flow_id: &str) -> Vec<String> {
    let mut errors = Vec::new();
    check_name_part("user", user, &mut errors);
    check_name_part("flowId", flow_id, &mut errors);
    errors
}

fn finish(errors: Vec<String>) -> Result<(), FlowError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(FlowError::Validation(errors))
    }
}

/// Identity checks that need no store access.
///
/// # Errors
///
/// Returns [`FlowError::Validation`] naming every problem.
pub fn validate_identity(request: &DeployRequest) -> Result<(), FlowError> {
    let mut errors = identity_errors(&request.user, &request.flow_id);
    if request.steps.is_empty() {
        errors.push("steps is required and must be non-empty".to_string());
    }
    finish(errors)
}

/// Full structural validation of a deploy request and its assembled steps.
///
/// # Errors
///
/// Returns [`FlowError::Validation`] naming every offending field and step.
pub fn validate_deploy(request: &DeployRequest, steps: &[StepSpec]) -> Result<(), FlowError> {
    let mut errors = identity_errors(&request.user, &request.flow_id);
    if steps.is_empty() {
        errors.push("steps is required and must be non-empty".to_string());
    }
    for step in steps {
        if !step.code.contains(HANDLE_SIGNATURE) {
            errors.push(format!(
                "step '{}' code must define def handle(evt: dict)",
                step.name
            ));
        }
    }
    finish(errors)
}
