//! Resubmission of requests the remote rejected with "too many requests".

use std::time::Duration;
use tokio::time::Instant;

use crate::transport::ResponseStatus;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Fixed-delay retry for overloaded responses.
///
/// A disabled policy (no interval) never retries, so 429s reach the caller
/// as-is. There is no retry ceiling unless `max_retries` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Option<Duration>,
    max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Some(DEFAULT_RETRY_INTERVAL))
    }
}

/// What to do with a transport outcome.
#[derive(Debug)]
pub enum Verdict<R, T, E> {
    /// Hand the outcome to the caller unchanged.
    Settled(Result<T, E>),
    /// Send the request again once the retry state elapses.
    Resubmit(RetryState<R>),
}

/// A request scheduled for resubmission.
#[derive(Debug)]
pub struct RetryState<R> {
    request: R,
    resubmit_at: Instant,
    attempt: u32,
}

impl<R> RetryState<R> {
    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn resubmit_at(&self) -> Instant {
        self.resubmit_at
    }

    /// Number of times the request has been dispatched so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait until the resubmission time, then give the request back.
    pub async fn elapsed(self) -> R {
        tokio::time::sleep_until(self.resubmit_at).await;
        self.request
    }
}

impl RetryPolicy {
    /// `None` disables retrying.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            max_retries: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Delay before resubmitting after the `attempt`-th dispatch produced `outcome`.
    ///
    /// Returns `None` when the outcome should be handed to the caller.
    pub fn retry_delay<O: ResponseStatus>(&self, outcome: &O, attempt: u32) -> Option<Duration> {
        let interval = self.interval?;
        if !outcome.is_overloaded() {
            return None;
        }
        match self.max_retries {
            Some(max) if attempt > max => None,
            _ => Some(interval),
        }
    }

    /// Inspect the outcome of the `attempt`-th dispatch of `request`.
    pub fn on_response<R, T, E>(
        &self,
        request: R,
        attempt: u32,
        outcome: Result<T, E>,
    ) -> Verdict<R, T, E>
    where
        T: ResponseStatus,
        E: ResponseStatus,
    {
        // A delay past the end of the clock is never reached, so it settles.
        let resubmit_at = self
            .retry_delay(&outcome, attempt)
            .and_then(|delay| Instant::now().checked_add(delay));

        match resubmit_at {
            Some(resubmit_at) => Verdict::Resubmit(RetryState {
                request,
                resubmit_at,
                attempt,
            }),
            None => Verdict::Settled(outcome),
        }
    }
}
