//! Execution result types.

use crate::error_code::ErrorKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Why a request ended without a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Terminal outcome of one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    /// Attempts made, including the terminal one. Zero when the request was
    /// rejected before reaching an adapter.
    pub attempts: u32,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub usage: TokenUsage,
    /// Wall-clock latency of the whole logical request in ms.
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
    /// Sum of the per-attempt costs, priced when each attempt was dispatched.
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    pub fn succeeded(
        request_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        text: String,
        usage: TokenUsage,
        attempts: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            attempts,
            status: ExecutionStatus::Succeeded,
            text: Some(text),
            usage,
            latency_ms,
            provider: provider.into(),
            model: model.into(),
            cost_usd: 0.0,
            failure: None,
        }
    }

    /// Build a failed result. `Timeout` and `DeadlineExceeded` become `TimedOut`.
    pub fn failed(
        request_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        err: &Error,
        attempts: u32,
        latency_ms: u64,
    ) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Timeout | ErrorKind::DeadlineExceeded => ExecutionStatus::TimedOut,
            _ => ExecutionStatus::Failed,
        };
        Self {
            request_id: request_id.into(),
            attempts,
            status,
            text: None,
            usage: TokenUsage::default(),
            latency_ms,
            provider: provider.into(),
            model: model.into(),
            cost_usd: 0.0,
            failure: Some(ExecutionFailure {
                kind,
                message: err.to_string(),
                retry_after_ms: err.retry_after_ms(),
            }),
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Convert into a `Result`, re-raising the preserved failure kind.
    pub fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(ref f) => Err(Error::Dispatch {
                kind: f.kind,
                message: f.message.clone(),
                retry_after_ms: f.retry_after_ms,
            }),
            None => Ok(self),
        }
    }
}
