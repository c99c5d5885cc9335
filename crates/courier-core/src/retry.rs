//! Retry policy: decides whether and when a failed attempt runs again.

use std::time::Duration;

use rand::Rng;

use crate::domain::FailureClass;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `delay`; the next attempt is charged.
    Retry { delay: Duration },
    /// Refresh the auth token, then re-enqueue at once. Not charged.
    RefreshAndRetry,
    /// Terminal.
    GiveUp,
}

/// Exponential backoff with jitter.
///
/// `delay = min(max_delay, base_delay * 2^n) * (1 ± jitter)` where `n` is the
/// retry index (0 for the first retry).
///
/// Example with the defaults (base 1s, jitter 10%):
/// - first retry: 0.9s..1.1s
/// - second retry: 1.8s..2.2s
/// - sixth retry and later: capped at 30s (27s..33s)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, in `0.0..=1.0`.
    pub jitter: f64,
    /// Token refreshes allowed per request.
    pub max_auth_refreshes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.1,
            max_auth_refreshes: 1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `n`, before jitter.
    pub fn nominal(&self, n: u32) -> Duration {
        let factor = 2f64.powi(n.min(32) as i32);
        let raw = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Inclusive range every `backoff(n)` falls in.
    pub fn bounds(&self, n: u32) -> (Duration, Duration) {
        (self.backoff_with(n, -1.0), self.backoff_with(n, 1.0))
    }

    /// Jittered delay before retry `n`.
    pub fn backoff(&self, n: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.backoff_with(n, unit)
    }

    /// `unit` in `-1.0..=1.0` picks the point inside the jitter band.
    pub fn backoff_with(&self, n: u32, unit: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let scale = 1.0 + jitter * unit.clamp(-1.0, 1.0);
        Duration::from_secs_f64(self.nominal(n).as_secs_f64() * scale)
    }

    /// Decide the follow-up for a failed attempt.
    ///
    /// `attempt` is the number of charged attempts so far, the failed one
    /// included. An auth failure gets one free retry after a refresh even
    /// when the budget is spent; a second auth failure is terminal.
    pub fn decide(
        &self,
        class: FailureClass,
        attempt: u32,
        max_attempts: u32,
        retry_after: Option<Duration>,
        auth_refreshes: u32,
    ) -> RetryDecision {
        match (class, retry_after) {
            (FailureClass::Client, _) => RetryDecision::GiveUp,
            (FailureClass::Auth, _) if auth_refreshes < self.max_auth_refreshes => {
                RetryDecision::RefreshAndRetry
            }
            (FailureClass::Auth, _) => RetryDecision::GiveUp,
            _ if attempt >= max_attempts => RetryDecision::GiveUp,
            (FailureClass::RateLimit, Some(hint)) => RetryDecision::Retry {
                delay: hint.min(self.max_delay),
            },
            _ => RetryDecision::Retry {
                delay: self.backoff(attempt.saturating_sub(1)),
            },
        }
    }
}
