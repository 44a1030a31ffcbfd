//! 弹性模式模块：熔断器、令牌桶限流与重试策略。
//!
//! # Resilience Primitives Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Rolling-window circuit breaker, one per provider |
//! | [`rate_limiter`] | Token bucket / quota tracker, one per (provider, credential) |
//! | [`retry`] | The single retry/backoff policy used by the dispatcher |
//!
//! These are the only mutable shared state in the dispatch path. Each instance
//! guards itself with its own lock, so contention on one provider never stalls
//! another.
//!
//! ```rust
//! use prompt_kernel::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_window(Duration::from_secs(60)),
//! );
//! if breaker.allow().is_ok() {
//!     // call the provider ...
//!     breaker.on_success();
//! }
//! ```
//!
//! ```rust
//! use prompt_kernel::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(RateLimiterConfig::per_window(100, Duration::from_secs(60)));
//! assert!(limiter.try_acquire(1).is_granted());
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{Acquire, RateLimiter, RateLimiterConfig};
pub use retry::{Decision, RetryPolicy};

/// The limiter in its per-key credit accounting role.
pub type QuotaTracker = RateLimiter;
