//! 用量账本模块：记录每次调度尝试，并定义结果存储的窄接口。
//!
//! # Usage Ledger Module
//!
//! Every dispatch attempt, successful or not, produces one [`UsageRecord`].
//! Persistence is an external collaborator reached through two narrow traits:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`UsageLedger`] | Append-only sink for usage records |
//! | [`ResultStore`] | Save audit results and batch reports |
//! | [`InMemoryStore`] | Idempotent in-process implementation of both |
//! | [`NoopLedger`] | Discards everything (default) |
//! | [`ModelPricing`] | Per-model price table used for `cost_usd` |
//!
//! All writes are idempotent: usage records on `(request_id, attempt)`, audit
//! results on their fingerprint, batch reports on their batch id.

mod memory;
mod pricing;

pub use memory::InMemoryStore;
pub use pricing::ModelPricing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::AuditResult;
use crate::batch::BatchReport;
use crate::error_code::ErrorKind;
use crate::types::{CallerIdentity, TokenUsage};
use crate::Result;

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ErrorKind),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }
}

/// One dispatch attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    /// Caller-supplied key shared by retries of the same logical request.
    /// Defaults to the request id.
    #[serde(default)]
    pub idempotency_key: String,
    /// 1-based attempt number within the logical request.
    pub attempt: u32,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    /// 0.0 when no price is known for the model.
    pub cost_usd: f64,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub caller: CallerIdentity,
    /// Unix epoch milliseconds.
    pub timestamp_ms: u64,
}

impl UsageRecord {
    pub fn key(&self) -> (String, u32) {
        (self.request_id.clone(), self.attempt)
    }
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, record: UsageRecord) -> Result<()>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_audit(&self, result: &AuditResult) -> Result<()>;

    async fn save_batch(&self, report: &BatchReport) -> Result<()>;
}

/// Ledger that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLedger;

#[async_trait]
impl UsageLedger for NoopLedger {
    async fn append(&self, _record: UsageRecord) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ResultStore for NoopLedger {
    async fn save_audit(&self, _result: &AuditResult) -> Result<()> {
        Ok(())
    }

    async fn save_batch(&self, _report: &BatchReport) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
