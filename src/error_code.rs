//! 标准错误分类：调度器统一的错误种类及其重试语义。
//!
//! Shared error taxonomy for every provider adapter.
//!
//! Adapters translate backend-specific failures (HTTP status codes, provider
//! error codes, transport timeouts) into an [`ErrorKind`] so the dispatcher can
//! apply one retry policy regardless of backend.
//!
//! | Prefix | Category      | Description                          |
//! |--------|---------------|--------------------------------------|
//! | E1xxx  | client        | Request-side errors, never retried   |
//! | E2xxx  | rate          | Rate limit errors                    |
//! | E3xxx  | server        | Provider-side / availability errors  |
//! | E4xxx  | operational   | Deadlines and cancellation           |
//! | E9xxx  | internal      | Normalization failures               |
//!
//! ```rust
//! use prompt_kernel::error_code::ErrorKind;
//!
//! let kind = ErrorKind::from_http_status(429);
//! assert_eq!(kind, ErrorKind::RateLimited);
//! assert!(kind.is_transient());
//! assert_eq!(kind.code(), "E2001");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// E1001: malformed input
    InvalidRequest,
    /// E1002: bad or expired credential
    AuthFailure,
    /// E1003: provider identifier is not configured
    UnknownProvider,
    /// E1004: model is not in the provider's supported set
    UnsupportedModel,
    /// E2001: provider or local bucket refused the call
    RateLimited,
    /// E3001: a single attempt ran out of time
    Timeout,
    /// E3002: 5xx-equivalent backend failure
    ServerError,
    /// E3003: circuit open, fail fast
    ProviderUnavailable,
    /// E4001: overall deadline reached or timeouts exhausted
    DeadlineExceeded,
    /// E4002: caller cancelled at a retry boundary
    Cancelled,
    /// E9999: unexpected normalization failure
    InternalAdapterError,
}

impl ErrorKind {
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::AuthFailure => "E1002",
            Self::UnknownProvider => "E1003",
            Self::UnsupportedModel => "E1004",
            Self::RateLimited => "E2001",
            Self::Timeout => "E3001",
            Self::ServerError => "E3002",
            Self::ProviderUnavailable => "E3003",
            Self::DeadlineExceeded => "E4001",
            Self::Cancelled => "E4002",
            Self::InternalAdapterError => "E9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AuthFailure => "auth_failure",
            Self::UnknownProvider => "unknown_provider",
            Self::UnsupportedModel => "unsupported_model",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::InternalAdapterError => "internal_adapter_error",
        }
    }

    /// Transient kinds are retried by the dispatcher and only surfaced after
    /// the retry budget or the overall deadline is exhausted.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::ServerError)
    }

    /// Whether a failure of this kind counts against the provider's circuit.
    ///
    /// Caller-side mistakes (bad input, unknown model) say nothing about the
    /// provider's health.
    #[inline]
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ServerError | Self::RateLimited | Self::InternalAdapterError
        )
    }

    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::AuthFailure
            | Self::UnknownProvider
            | Self::UnsupportedModel => "client",
            Self::RateLimited => "rate",
            Self::Timeout | Self::ServerError | Self::ProviderUnavailable => "server",
            Self::DeadlineExceeded | Self::Cancelled => "operational",
            Self::InternalAdapterError => "internal",
        }
    }

    /// Maps a provider error code/type string (OpenAI, Anthropic and Gemini
    /// spellings) onto the shared taxonomy.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let kind = match provider_code {
            "invalid_request" | "invalid_request_error" | "INVALID_ARGUMENT"
            | "context_length_exceeded" => Self::InvalidRequest,
            "invalid_api_key" | "authentication_error" | "permission_error"
            | "UNAUTHENTICATED" | "PERMISSION_DENIED" => Self::AuthFailure,
            "model_not_found" | "not_found_error" | "NOT_FOUND" => Self::UnsupportedModel,
            "rate_limit_exceeded" | "rate_limit_error" | "insufficient_quota"
            | "RESOURCE_EXHAUSTED" => Self::RateLimited,
            "server_error" | "api_error" | "INTERNAL" => Self::ServerError,
            "overloaded_error" | "UNAVAILABLE" => Self::ServerError,
            "timeout" | "DEADLINE_EXCEEDED" => Self::Timeout,
            _ => return None,
        };
        Some(kind)
    }

    /// Maps an HTTP status code to the most likely kind.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => Self::InvalidRequest,
            401 | 403 => Self::AuthFailure,
            404 => Self::UnsupportedModel,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::InternalAdapterError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
