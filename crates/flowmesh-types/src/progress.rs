//! Progress events streamed back to the caller of a deploy or kick.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a streaming request was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Provision (when changed), then kick and verify.
    #[default]
    Deploy,
    /// Kick and verify an already deployed flow.
    Kick,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Kick => "kick",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "deploy" => Ok(Self::Deploy),
            "kick" => Ok(Self::Kick),
            other => Err(format!("unknown operation '{other}', expected deploy or kick")),
        }
    }
}

/// Stage a progress event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Hello,
    ApplyStart,
    ApplySkip,
    ApplyOk,
    VerifyStart,
    VerifyOk,
    VerifyNg,
    Warning,
    Error,
    Done,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::ApplyStart => "apply.start",
            Self::ApplySkip => "apply.skip",
            Self::ApplyOk => "apply.ok",
            Self::VerifyStart => "verify.start",
            Self::VerifyOk => "verify.ok",
            Self::VerifyNg => "verify.ng",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named event on the server-push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Hello,
    Progress,
    Done,
    Error,
}

impl StreamEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Progress => "progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// `done` and `error` close the stream.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Payload of every stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: String,
    pub message: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(phase: Phase, message: impl Into<String>, ok: bool) -> Self {
        Self {
            phase: phase.as_str().to_string(),
            message: message.into(),
            ok,
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A progress payload tagged with the stream event name it travels under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub payload: ProgressEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parse() {
        assert_eq!("".parse::<Operation>().unwrap(), Operation::Deploy);
        assert_eq!("KICK".parse::<Operation>().unwrap(), Operation::Kick);
        assert!("destroy".parse::<Operation>().is_err());
    }

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(Phase::ApplySkip.as_str(), "apply.skip");
        assert_eq!(Phase::VerifyNg.to_string(), "verify.ng");
    }

    #[test]
    fn test_progress_event_serializes_data_only_when_present() {
        let bare = ProgressEvent::new(Phase::Done, "operation finished", true);
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("data").is_none());

        let rich = bare.with_data("elapsedMs", 12);
        let json = serde_json::to_value(&rich).unwrap();
        assert_eq!(json["data"]["elapsedMs"], 12);
        assert_eq!(json["phase"], "done");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(StreamEventKind::Done.is_terminal());
        assert!(StreamEventKind::Error.is_terminal());
        assert!(!StreamEventKind::Progress.is_terminal());
    }
}
