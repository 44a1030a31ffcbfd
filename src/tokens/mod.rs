//! Token 估算模块：在后端未返回用量时提供字符级近似。
//!
//! # Token Estimation Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token counting implementations |
//! | [`CharacterEstimator`] | Character-based approximation (4 chars ≈ 1 token) |
//!
//! Adapters use the estimator to fill [`TokenUsage`](crate::types::TokenUsage)
//! when a backend omits usage; the simplicity audit rule uses it to measure
//! prompt length.
//!
//! ```rust
//! use prompt_kernel::tokens::{CharacterEstimator, TokenCounter};
//!
//! let counter = CharacterEstimator::new();
//! assert_eq!(counter.count("Fix the bug"), 3);
//! ```

mod counter;

pub use counter::{CharacterEstimator, TokenCounter};
