use crate::error_code::ErrorKind;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub capacity: f64,
    /// Tokens per second.
    pub refill_per_sec: f64,
    pub tokens: f64,
    pub granted_total: u64,
    pub denied_total: u64,
    /// Estimated wait until one token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum tokens held by the bucket.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_per_sec: f64,
}

impl RateLimiterConfig {
    /// `capacity` calls per `window`, refilled continuously.
    pub fn per_window(capacity: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let refill_per_sec = if secs > 0.0 {
            capacity as f64 / secs
        } else {
            0.0
        };
        Self {
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    pub fn new() -> Self {
        Self::per_window(60, Duration::from_secs(60))
    }

    pub fn with_capacity(mut self, tokens: u32) -> Self {
        self.capacity = tokens as f64;
        self
    }

    pub fn with_refill_rate(mut self, per_sec: f64) -> Self {
        self.refill_per_sec = per_sec;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a non-blocking acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Denied { retry_after: Duration },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
    /// Set when the provider itself signalled exhaustion (e.g. HTTP 429 + retry-after).
    blocked_until: Option<Instant>,
    granted_total: u64,
    denied_total: u64,
}

/// Token-bucket limiter and quota tracker for one (provider, credential) pair.
///
/// Refill, check and debit happen under one lock, so concurrent callers can
/// never spend the same token twice.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: std::sync::Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = std::sync::Mutex::new(State {
            tokens: cfg.capacity,
            last: Instant::now(),
            blocked_until: None,
            granted_total: 0,
            denied_total: 0,
        });
        Self { cfg, state }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.refill_per_sec).min(cfg.capacity);
            st.last = now;
        }
    }

    fn wait_for(cfg: &RateLimiterConfig, st: &State, n: f64) -> Duration {
        if cfg.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        let missing = (n - st.tokens).max(0.0);
        Duration::from_secs_f64(missing / cfg.refill_per_sec)
    }

    /// Try to take `n` tokens without waiting.
    pub fn try_acquire(&self, n: u32) -> Acquire {
        let cfg = &self.cfg;
        let n = n as f64;
        let mut st = self.lock();
        let now = Instant::now();

        if let Some(until) = st.blocked_until {
            if until > now {
                st.denied_total += 1;
                return Acquire::Denied {
                    retry_after: until.duration_since(now),
                };
            }
            st.blocked_until = None;
        }

        Self::refill_locked(cfg, &mut st, now);
        if st.tokens >= n {
            st.tokens -= n;
            st.granted_total += 1;
            Acquire::Granted
        } else {
            st.denied_total += 1;
            Acquire::Denied {
                retry_after: Self::wait_for(cfg, &st, n),
            }
        }
    }

    /// Take `n` tokens, sleeping for refills up to `timeout`.
    ///
    /// Fails with `RateLimited` (carrying a retry-after hint) when the tokens
    /// cannot be obtained in time, and with `InvalidRequest` when `n` exceeds
    /// the bucket capacity.
    pub async fn acquire_within(&self, n: u32, timeout: Duration) -> Result<()> {
        if n as f64 > self.cfg.capacity {
            return Err(Error::dispatch(
                ErrorKind::InvalidRequest,
                format!(
                    "requested {} tokens exceeds bucket capacity {}",
                    n, self.cfg.capacity
                ),
            ));
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire(n) {
                Acquire::Granted => return Ok(()),
                Acquire::Denied { retry_after } => {
                    let now = Instant::now();
                    let remaining = deadline.saturating_duration_since(now);
                    if retry_after > remaining {
                        return Err(Error::dispatch(
                            ErrorKind::RateLimited,
                            "rate limit budget exhausted",
                        )
                        .with_retry_after(Some(retry_after.as_millis().min(u64::MAX as u128) as u64)));
                    }
                    // sleep at least 1ms to avoid spinning on float rounding
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Record a provider-reported exhaustion: drain the bucket and block
    /// acquisitions for `retry_after`.
    pub fn penalize(&self, retry_after: Duration) {
        let mut st = self.lock();
        let now = Instant::now();
        let until = now + retry_after;
        st.tokens = 0.0;
        st.last = now;
        st.blocked_until = Some(match st.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.lock();
        let now = Instant::now();
        Self::refill_locked(cfg, &mut st, now);

        let mut wait_ms = st
            .blocked_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now).as_millis() as u64);
        if st.tokens < 1.0 && cfg.refill_per_sec > 0.0 {
            let local = Self::wait_for(cfg, &st, 1.0).as_millis() as u64;
            wait_ms = Some(wait_ms.unwrap_or(0).max(local));
        }

        RateLimiterSnapshot {
            capacity: cfg.capacity,
            refill_per_sec: cfg.refill_per_sec,
            tokens: st.tokens,
            granted_total: st.granted_total,
            denied_total: st.denied_total,
            estimated_wait_ms: wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_per_window_config() {
        let config = RateLimiterConfig::per_window(60, Duration::from_secs(60));
        assert_eq!(config.capacity, 60.0);
        assert_eq!(config.refill_per_sec, 1.0);
    }

    #[tokio::test]
    async fn test_try_acquire_drains_bucket() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_capacity(3)
                .with_refill_rate(0.001),
        );
        assert!(limiter.try_acquire(1).is_granted());
        assert!(limiter.try_acquire(2).is_granted());
        match limiter.try_acquire(1) {
            Acquire::Denied { retry_after } => assert!(retry_after > Duration::ZERO),
            Acquire::Granted => panic!("bucket should be empty"),
        }
        let snap = limiter.snapshot();
        assert_eq!(snap.granted_total, 2);
        assert_eq!(snap.denied_total, 1);
        assert!(snap.estimated_wait_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(1, Duration::from_millis(100)));
        assert!(limiter.try_acquire(1).is_granted());
        limiter
            .acquire_within(1, Duration::from_millis(500))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_times_out() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(1, Duration::from_secs(60)));
        assert!(limiter.try_acquire(1).is_granted());
        let err = limiter
            .acquire_within(1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.retry_after_ms().unwrap() > 50);
    }

    #[tokio::test]
    async fn test_oversized_request_is_invalid() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(2, Duration::from_secs(1)));
        let err = limiter
            .acquire_within(3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_blocks_until_reset() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(10, Duration::from_secs(1)));
        limiter.penalize(Duration::from_millis(200));
        assert!(!limiter.try_acquire(1).is_granted());
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.try_acquire(1).is_granted());
    }

    #[test]
    fn test_no_double_spend_under_contention() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig::new()
                .with_capacity(50)
                .with_refill_rate(0.0),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&limiter);
                std::thread::spawn(move || (0..20).filter(|_| l.try_acquire(1).is_granted()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
    }
}
