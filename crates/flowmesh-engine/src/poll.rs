//! Bounded polling against explicit deadlines.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Point in time after which polling gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    #[must_use]
    pub fn after_secs(secs: u64) -> Self {
        Self::after(Duration::from_secs(secs))
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

impl<T> PollOutcome<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::TimedOut | Self::Cancelled => None,
        }
    }
}

/// Run `probe` every `interval` until it yields a value, the deadline
/// passes, or `cancel` fires. The probe runs at least once unless the
/// token is already cancelled.
pub async fn poll_until<T, F, Fut>(
    deadline: Deadline,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }
        if deadline.is_expired() {
            return PollOutcome::TimedOut;
        }
        let pause = interval.min(deadline.remaining());
        tokio::select! {
            () = cancel.cancelled() => return PollOutcome::Cancelled,
            () = tokio::time::sleep(pause) => {}
        }
    }
}
