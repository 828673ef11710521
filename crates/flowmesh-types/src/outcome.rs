//! Result types produced by the preflight, verify, unit-test, and teardown
//! operations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker printed by the preflight harness when every step completed.
pub const PREFLIGHT_OK_MARKER: &str = "OK";

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

/// Outcome of the offline dry run of a whole flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightResult {
    pub ok: bool,
    /// Success marker, or truncated harness logs on failure.
    pub detail: String,
}

impl PreflightResult {
    #[must_use]
    pub fn passed() -> Self {
        Self {
            ok: true,
            detail: PREFLIGHT_OK_MARKER.to_string(),
        }
    }

    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }

    /// Harness error tag (e.g. `EMPTY_OUTPUT`) found in the failure detail.
    #[must_use]
    pub fn error_tag(&self) -> Option<&str> {
        if self.ok {
            return None;
        }
        self.detail.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("STEP ")?;
            let (_, tail) = rest.split_once(' ')?;
            let tag = tail.split(|c: char| c == ':' || c.is_whitespace()).next()?;
            (!tag.is_empty() && tag.chars().all(|c| c.is_ascii_uppercase() || c == '_'))
                .then_some(tag)
        })
    }
}

// ---------------------------------------------------------------------------
// Kick & verify
// ---------------------------------------------------------------------------

/// Where a verification run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStage {
    /// Steps could not be resolved for the flow.
    Steps,
    /// Provisioning failed before verification began.
    Apply,
    /// A deployed resource never reported Ready.
    Readiness,
    /// The injection job could not be created or did not succeed.
    Inject,
    /// The second-to-last step never logged the expected emission.
    UpstreamEmission,
    /// The last step never logged receipt of the expected type.
    DownstreamReceipt,
    /// The caller went away before a verdict.
    Cancelled,
}

impl VerifyStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Apply => "apply",
            Self::Readiness => "readiness",
            Self::Inject => "inject",
            Self::UpstreamEmission => "upstream_emission",
            Self::DownstreamReceipt => "downstream_receipt",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Structured failure of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyFailure {
    pub stage: VerifyStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl VerifyFailure {
    #[must_use]
    pub fn new(stage: VerifyStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// Verdict of a deploy/kick verification.
///
/// Renders as `OK: <summary>` or `NG: <message>` for human consumption;
/// callers branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Passed { summary: String },
    Failed(VerifyFailure),
}

impl VerifyOutcome {
    #[must_use]
    pub fn passed(summary: impl Into<String>) -> Self {
        Self::Passed {
            summary: summary.into(),
        }
    }

    #[must_use]
    pub fn failed(stage: VerifyStage, message: impl Into<String>) -> Self {
        Self::Failed(VerifyFailure::new(stage, message))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    #[must_use]
    pub fn failure(&self) -> Option<&VerifyFailure> {
        match self {
            Self::Passed { .. } => None,
            Self::Failed(f) => Some(f),
        }
    }
}

impl From<VerifyFailure> for VerifyOutcome {
    fn from(value: VerifyFailure) -> Self {
        Self::Failed(value)
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed { summary } => write!(f, "OK: {summary}"),
            Self::Failed(failure) => {
                write!(f, "NG: {}", failure.message)?;
                if let Some(diag) = &failure.diagnostic {
                    write!(f, "\n{diag}")?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit test
// ---------------------------------------------------------------------------

/// Response of a single-step sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UnitTestReport {
    pub job: String,
    pub finished: bool,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    /// `"syntax"` when only a parse check ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Any further fields the harness reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UnitTestReport {
    /// Build a report from the JSON object the harness printed.
    #[must_use]
    pub fn from_result(job: impl Into<String>, finished: bool, mut result: Map<String, Value>) -> Self {
        let ok = result.remove("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        let step = take_string(&mut result, "step");
        let time_ms = result.remove("timeMs").and_then(|v| v.as_u64());
        let preview = take_string(&mut result, "preview");
        let check = take_string(&mut result, "check");
        let error = take_string(&mut result, "error");
        Self {
            job: job.into(),
            finished,
            ok,
            step,
            time_ms,
            preview,
            check,
            error,
            logs: None,
            extra: result,
        }
    }

    /// Report for a run whose logs held no recognizable result.
    #[must_use]
    pub fn missing_result(job: impl Into<String>, finished: bool) -> Self {
        Self {
            job: job.into(),
            finished,
            ok: false,
            error: Some("RESULT_JSON not found in logs".to_string()),
            ..Self::default()
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Summary of a best-effort flow teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TeardownReport {
    pub flow_id: String,
    pub namespace: String,
    pub topic_namespace: String,
    /// Deleted object count per resource kind.
    pub deleted: BTreeMap<String, usize>,
    pub topic_deleted: bool,
    pub warnings: Vec<String>,
}

impl TeardownReport {
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.deleted.values().sum::<usize>() + usize::from(self.topic_deleted)
    }

    /// One human-readable status line.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!("deleted namespaced resources flow_id={}", self.flow_id);
        if !self.deleted.is_empty() {
            let counts: Vec<String> = self
                .deleted
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            line.push_str(&format!(" ({})", counts.join(", ")));
        }
        if self.topic_deleted {
            line.push_str(&format!(" + KafkaTopic deleted in ns={}", self.topic_namespace));
        }
        for warning in &self.warnings {
            line.push_str(&format!(" (warning: {warning})"));
        }
        line
    }
}
