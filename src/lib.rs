//! # prompt-kernel
//!
//! 多厂商提示词执行编排器与 KERNEL 提示词审计引擎。
//!
//! Multi-provider prompt execution orchestrator with a deterministic prompt
//! audit engine.
//!
//! ## Overview
//!
//! A single logical execution request is dispatched to one of several
//! interchangeable AI backends. The dispatcher owns every policy decision
//! (rate limiting, concurrency, timeouts, retries, circuit breaking) so the
//! provider adapters stay thin translators. The audit engine scores prompt text
//! on the six KERNEL dimensions and lists issues with suggested fixes. The
//! batch runner composes both.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prompt_kernel::config::KernelConfig;
//! use prompt_kernel::dispatch::Dispatcher;
//! use prompt_kernel::ledger::InMemoryStore;
//! use prompt_kernel::registry::ProviderRegistry;
//! use prompt_kernel::types::ExecutionRequest;
//!
//! #[tokio::main]
//! async fn main() -> prompt_kernel::Result<()> {
//!     let config = KernelConfig::from_path("providers.yaml")?;
//!     let registry = Arc::new(ProviderRegistry::new(&config)?);
//!     let dispatcher = Dispatcher::new(registry, Arc::new(InMemoryStore::new()));
//!
//!     let request = ExecutionRequest::new("openai", "Summarize RFC 9110 section 15 in 5 bullets.");
//!     let result = dispatcher.execute(&request, &dispatcher.default_policy()).await;
//!     println!("{:?}", result.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Execution requests, results, token usage |
//! | [`config`] | Provider configuration, loading, hot reload |
//! | [`adapters`] | One adapter per backend behind [`adapters::ProviderAdapter`] |
//! | [`registry`] | Atomically swapped provider snapshot and health |
//! | [`resilience`] | Circuit breaker, rate limiter, retry policy |
//! | [`dispatch`] | The orchestrator: `execute`, `execute_batch` |
//! | [`ledger`] | Usage records, result storage, pricing |
//! | [`audit`] | KERNEL rule modules and the audit engine |
//! | [`batch`] | Prompt × provider batch runs |
//! | [`tokens`] | Token estimation |
//! | [`transport`] | Shared HTTP transport and credential resolution |
//! | [`telemetry`] | Tracing subscriber installation |

pub mod adapters;
pub mod audit;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error_code;
pub mod ledger;
pub mod registry;
pub mod resilience;
pub mod telemetry;
pub mod tokens;
pub mod transport;
pub mod types;

pub use audit::{AuditEngine, AuditResult, KernelScore, RuleSetVersion};
pub use batch::{BatchReport, BatchRunner};
pub use dispatch::Dispatcher;
pub use error_code::ErrorKind;
pub use registry::ProviderRegistry;
pub use types::{ExecutionRequest, ExecutionResult};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
