//! 类型系统模块：执行请求与执行结果的核心数据类型。
//!
//! # Types Module
//!
//! Core entities that flow through the dispatcher.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ExecutionRequest`] | One logical prompt execution against one provider |
//! | [`SamplingParams`] | Temperature / max token knobs, validated before dispatch |
//! | [`CallerIdentity`] | Identity and entitlement tier supplied by the auth layer |
//! | [`ExecutionResult`] | Terminal outcome of a logical request |
//! | [`TokenUsage`] | Prompt / completion / total token counts |
//!
//! ```rust
//! use prompt_kernel::types::{ExecutionRequest, SamplingParams};
//!
//! let request = ExecutionRequest::new("openai", "Summarize the release notes in 3 bullets.")
//!     .with_model("gpt-4o-mini")
//!     .with_sampling(SamplingParams::new().with_temperature(0.2).with_max_tokens(256));
//! assert!(request.validate().is_ok());
//! ```

pub mod request;
pub mod result;

pub use request::{CallerIdentity, ExecutionRequest, SamplingParams};
pub use result::{ExecutionFailure, ExecutionResult, ExecutionStatus, TokenUsage};
