use crate::error_code::ErrorKind;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; one trial call decides.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub window_ms: u64,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Failures older than this no longer count towards the threshold.
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    /// Timestamps of consecutive failures since the last success.
    failures: VecDeque<Instant>,
    open_until: Option<Instant>,
    half_open: bool,
    /// Start of the outstanding half-open trial.
    trial_started: Option<Instant>,
}

impl State {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&first) = self.failures.front() {
            if now.duration_since(first) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-provider circuit breaker.
///
/// - Opens after `failure_threshold` consecutive failures inside `window`
/// - Rejects with `ProviderUnavailable` (plus a retry-after hint) while open
/// - After `cooldown` goes half-open and admits a single trial call: a success
///   closes it, a failure reopens it. A trial that never reports back is
///   abandoned after another `cooldown`.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: std::sync::Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: std::sync::Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State stays consistent even if a holder panicked; recover the guard.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Gate a call. Never mutates failure counts.
    pub fn allow(&self) -> Result<()> {
        let mut st = self.lock();
        let now = Instant::now();
        if let Some(until) = st.open_until {
            if now < until {
                let remaining = until.duration_since(now).as_millis() as u64;
                return Err(Error::dispatch(
                    ErrorKind::ProviderUnavailable,
                    "circuit breaker open",
                )
                .with_retry_after(Some(remaining)));
            }
            st.open_until = None;
            st.half_open = true;
            st.trial_started = None;
        }
        if st.half_open {
            if let Some(started) = st.trial_started {
                let abandon_at = started + self.cfg.cooldown;
                if now < abandon_at {
                    let remaining = abandon_at.duration_since(now).as_millis() as u64;
                    return Err(Error::dispatch(
                        ErrorKind::ProviderUnavailable,
                        "circuit breaker half-open, trial call in flight",
                    )
                    .with_retry_after(Some(remaining)));
                }
            }
            st.trial_started = Some(now);
        }
        Ok(())
    }

    /// Give up the half-open trial slot without deciding the circuit, e.g.
    /// when the trial failed for a reason that does not count against the
    /// provider.
    pub fn release_trial(&self) {
        self.lock().trial_started = None;
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        st.failures.clear();
        st.open_until = None;
        st.half_open = false;
        st.trial_started = None;
    }

    /// Record a failure; returns `true` when this failure opened the circuit.
    pub fn on_failure(&self) -> bool {
        let mut st = self.lock();
        let now = Instant::now();
        let cooled = st.open_until.map_or(false, |until| now >= until);
        if st.half_open || cooled {
            st.half_open = false;
            st.trial_started = None;
            st.failures.clear();
            st.failures.push_back(now);
            st.open_until = Some(now + self.cfg.cooldown);
            return true;
        }
        st.prune(now, self.cfg.window);
        st.failures.push_back(now);
        if st.open_until.is_none() && st.failures.len() as u32 >= self.cfg.failure_threshold {
            st.open_until = Some(now + self.cfg.cooldown);
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.snapshot().state == CircuitState::Open
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut st = self.lock();
        let now = Instant::now();
        st.prune(now, self.cfg.window);
        let open_remaining_ms = st.open_until.and_then(|until| {
            if until > now {
                Some(until.duration_since(now).as_millis() as u64)
            } else {
                None
            }
        });
        let state = match (open_remaining_ms, st.open_until) {
            (Some(_), _) => CircuitState::Open,
            (None, Some(_)) => CircuitState::HalfOpen,
            (None, None) if st.half_open => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        };
        CircuitBreakerSnapshot {
            state,
            failure_threshold: self.cfg.failure_threshold,
            window_ms: self.cfg.window.as_millis() as u64,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.failures.len() as u32,
            open_remaining_ms,
        }
    }
}
