//! Ordered progress reporting for streaming operations.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use flowmesh_types::outcome::VerifyOutcome;
use flowmesh_types::progress::{Operation, Phase, ProgressEvent, StreamEvent, StreamEventKind};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Sends [`StreamEvent`]s for one operation, stamping each with the
/// operation name, its id, and the time elapsed since it started.
///
/// Send failures are ignored: a receiver that went away means the caller
/// disconnected, and cancellation handles the rest.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<StreamEvent>,
    op: Operation,
    op_id: String,
    started: Instant,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>, op: Operation, op_id: impl Into<String>) -> Self {
        Self {
            tx,
            op,
            op_id: op_id.into(),
            started: Instant::now(),
        }
    }

    /// Reporter plus the receiving end of its stream.
    #[must_use]
    pub fn channel(op: Operation, op_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, op, op_id), rx)
    }

    #[must_use]
    pub fn op(&self) -> Operation {
        self.op
    }

    #[must_use]
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn send(&self, kind: StreamEventKind, mut payload: ProgressEvent) {
        payload
            .data
            .entry("op")
            .or_insert_with(|| Value::from(self.op.as_str()));
        payload.data.insert("opId".into(), Value::from(self.op_id.as_str()));
        payload.data.insert("elapsedMs".into(), Value::from(self.elapsed_ms()));
        let _ = self.tx.send(StreamEvent { kind, payload });
    }

    /// First event of every stream.
    pub fn hello(&self) {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = ProgressEvent::new(Phase::Hello, "operation started", true)
            .with_data("op", self.op.as_str())
            .with_data("ts", ts);
        let _ = self.tx.send(StreamEvent {
            kind: StreamEventKind::Hello,
            payload: payload.with_data("opId", self.op_id.as_str()),
        });
    }

    pub fn progress(&self, phase: Phase, message: impl Into<String>, data: Map<String, Value>) {
        let mut payload = ProgressEvent::new(phase, message, true);
        payload.data = data;
        self.send(StreamEventKind::Progress, payload);
    }

    /// Non-fatal problem; the operation continues.
    pub fn warning(&self, message: impl Into<String>) {
        self.send(StreamEventKind::Progress, ProgressEvent::new(Phase::Warning, message, true));
    }

    /// `verify.ok` as progress, or `verify.ng` as an error event.
    pub fn verdict(&self, outcome: &VerifyOutcome) {
        let message = outcome.to_string();
        if outcome.is_ok() {
            self.send(StreamEventKind::Progress, ProgressEvent::new(Phase::VerifyOk, message, true));
        } else {
            let mut payload = ProgressEvent::new(Phase::VerifyNg, message, false);
            if let Some(failure) = outcome.failure() {
                payload = payload.with_data("stage", failure.stage.as_str());
            }
            self.send(StreamEventKind::Error, payload);
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(StreamEventKind::Error, ProgressEvent::new(Phase::Error, message, false));
    }

    pub fn done(&self) {
        self.send(StreamEventKind::Done, ProgressEvent::new(Phase::Done, "operation finished", true));
    }
}
