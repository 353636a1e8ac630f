//! Existence polling with an injectable clock.
//!
//! Every wait in both loops goes through a [`Poller`]: probes are repeated at a
//! fixed interval (no backoff), optionally capped at a number of attempts, and
//! abandoned as soon as the cancellation token fires.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    Unbounded,
    AtMost(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("cancelled")]
    Cancelled,
    #[error("gave up waiting for {what} after {attempts} attempts")]
    Exhausted { what: String, attempts: u32 },
}

#[derive(Clone)]
pub struct Poller {
    interval: Duration,
    attempts: Attempts,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            interval,
            attempts: Attempts::Unbounded,
            sleeper,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Attempts) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, returning early with [`PollError::Cancelled`] if
    /// the token fires first. Used for UI settle delays as well as between
    /// probes.
    pub async fn pause(&self, duration: Duration) -> Result<(), PollError> {
        if self.cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PollError::Cancelled),
            _ = self.sleeper.sleep(duration) => Ok(()),
        }
    }

    /// Run `probe` until it returns `true`, sleeping one interval between
    /// attempts. Returns the number of probes made.
    pub async fn until<F, Fut>(&self, what: &str, mut probe: F) -> Result<u32, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            attempt = attempt.saturating_add(1);
            if probe().await {
                return Ok(attempt);
            }
            if let Attempts::AtMost(max) = self.attempts {
                if attempt >= max {
                    return Err(PollError::Exhausted {
                        what: what.to_string(),
                        attempts: attempt,
                    });
                }
            }
            debug!(attempt, "waiting for {what}");
            self.pause(self.interval).await?;
        }
    }
}
