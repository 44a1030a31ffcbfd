//! Retry / backoff policy consumed by the dispatcher.
//!
//! Adapters never retry on their own; every retry decision in the crate goes
//! through [`RetryPolicy::decide`].

use crate::error_code::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    /// Non-transient kind: surface now.
    Fail,
    /// Transient kind, but the attempt budget is spent.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
    pub attempt_timeout: Duration,
    /// Hard ceiling on the whole logical request.
    pub deadline: Duration,
    /// Tokens taken from the provider bucket per attempt.
    pub tokens_per_attempt: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: true,
            attempt_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(60),
            tokens_per_attempt: 1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// One attempt, no retries.
    pub fn single_attempt() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_base_backoff(mut self, d: Duration) -> Self {
        self.base_backoff = d;
        self
    }

    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, d: Duration) -> Self {
        self.attempt_timeout = d;
        self
    }

    pub fn with_deadline(mut self, d: Duration) -> Self {
        self.deadline = d;
        self
    }

    pub fn with_tokens_per_attempt(mut self, n: u32) -> Self {
        self.tokens_per_attempt = n;
        self
    }

    /// Backoff before retry number `attempt` (1-based: the delay after the
    /// first failure is `backoff(1)`).
    ///
    /// Exponential `base * 2^(attempt-1)`, capped at `max_backoff`. With jitter
    /// the delay is drawn uniformly from `[d/2, d]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        let cap = self.max_backoff.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor).min(cap);
        if self.jitter && delay > 1 {
            let half = delay / 2;
            let jittered = rand::thread_rng().gen_range(half..=delay);
            Duration::from_millis(jittered)
        } else {
            Duration::from_millis(delay)
        }
    }

    /// Decide after `attempt` (1-based) failed with `kind`. A provider
    /// retry-after hint raises the delay but never lowers it.
    pub fn decide(&self, kind: ErrorKind, attempt: u32, retry_after: Option<Duration>) -> Decision {
        if !kind.is_transient() {
            return Decision::Fail;
        }
        if attempt >= self.max_attempts {
            return Decision::Exhausted;
        }
        let mut delay = self.backoff(attempt);
        if let Some(ra) = retry_after {
            delay = delay.max(ra);
        }
        Decision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_contract() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_backoff, Duration::from_millis(500));
        assert_eq!(p.attempt_timeout, Duration::from_secs(30));
        assert_eq!(p.deadline, Duration::from_secs(60));
    }

    #[test]
    fn exponential_without_jitter() {
        let p = RetryPolicy::new()
            .with_jitter(false)
            .with_base_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(1000));
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(80), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let p = RetryPolicy::new().with_base_backoff(Duration::from_millis(400));
        for _ in 0..100 {
            let d = p.backoff(2).as_millis();
            assert!((400..=800).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn non_transient_fails_immediately() {
        let p = RetryPolicy::new();
        assert_eq!(p.decide(ErrorKind::AuthFailure, 1, None), Decision::Fail);
        assert_eq!(p.decide(ErrorKind::InvalidRequest, 1, None), Decision::Fail);
        assert_eq!(p.decide(ErrorKind::UnsupportedModel, 1, None), Decision::Fail);
    }

    #[test]
    fn transient_until_exhausted() {
        let p = RetryPolicy::new().with_max_attempts(2).with_jitter(false);
        assert!(matches!(
            p.decide(ErrorKind::Timeout, 1, None),
            Decision::Retry { .. }
        ));
        assert_eq!(p.decide(ErrorKind::Timeout, 2, None), Decision::Exhausted);
    }

    #[test]
    fn retry_after_raises_delay() {
        let p = RetryPolicy::new()
            .with_jitter(false)
            .with_base_backoff(Duration::from_millis(10));
        match p.decide(ErrorKind::RateLimited, 1, Some(Duration::from_secs(2))) {
            Decision::Retry { delay } => assert_eq!(delay, Duration::from_secs(2)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
