//! Provider 适配层：每个后端一个变体，统一 execute / normalize_error 能力
//!
//! Provider adapter layer. Each backend wire protocol is one variant of the closed
//! [`AdapterKind`] set, implemented behind the object-safe [`ProviderAdapter`]
//! trait and selected at runtime by [`create_adapter`]. Adding a backend means
//! adding a variant here; the dispatcher never changes.
//!
//! Adapters translate one call and normalize one outcome. They never retry:
//! every retry decision lives in [`RetryPolicy`](crate::resilience::RetryPolicy).

pub mod anthropic;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::ProviderConfig;
use crate::error_code::ErrorKind;
use crate::transport::{HttpTransport, TransportError};
use crate::types::{SamplingParams, TokenUsage};
use crate::Result;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Wire protocol family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterKind {
    /// OpenAI chat completions, also spoken by most compatible gateways.
    #[serde(rename = "openai", alias = "openai-compatible")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterKind::OpenAi => "openai",
            AdapterKind::Anthropic => "anthropic",
            AdapterKind::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

/// One outbound call, already resolved to a concrete model.
#[derive(Debug, Clone)]
pub struct AdapterCall {
    pub request_id: String,
    pub prompt: String,
    pub model: String,
    pub sampling: SamplingParams,
}

/// Normalized backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Time spent waiting on the backend, in ms.
    pub provider_latency_ms: u64,
}

/// Raw backend failure, before normalization to an [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("backend returned HTTP {status}: {message}")]
    Status {
        status: u16,
        /// Provider-specific error code/type, when the body carried one.
        provider_code: Option<String>,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("undecodable backend response: {0}")]
    Decode(String),
}

impl AdapterError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        AdapterError::Status {
            status,
            provider_code: None,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(self, ms: u64) -> Self {
        match self {
            AdapterError::Status {
                status,
                provider_code,
                message,
                ..
            } => AdapterError::Status {
                status,
                provider_code,
                message,
                retry_after_ms: Some(ms),
            },
            other => other,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AdapterError::Status { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Mapping shared by all HTTP adapters: provider code first, HTTP status second.
pub fn normalize_common(err: &AdapterError) -> ErrorKind {
    match err {
        AdapterError::Status {
            status,
            provider_code,
            ..
        } => provider_code
            .as_deref()
            .and_then(ErrorKind::from_provider_code)
            .unwrap_or_else(|| ErrorKind::from_http_status(*status)),
        AdapterError::Transport(TransportError::Timeout(_)) => ErrorKind::Timeout,
        AdapterError::Transport(TransportError::MissingCredential(_)) => ErrorKind::AuthFailure,
        AdapterError::Transport(TransportError::Http(e)) if e.is_timeout() => ErrorKind::Timeout,
        // Connection resets and refused connects behave like a 5xx.
        AdapterError::Transport(TransportError::Http(e)) if e.is_connect() || e.is_request() => {
            ErrorKind::ServerError
        }
        AdapterError::Transport(_) | AdapterError::Decode(_) => ErrorKind::InternalAdapterError,
    }
}

/// Capability contract every backend variant implements.
///
/// The trait is object-safe; the registry holds adapters as
/// `Arc<dyn ProviderAdapter>`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Provider identifier this adapter serves.
    fn provider_id(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Perform exactly one backend call.
    async fn execute(&self, call: &AdapterCall) -> std::result::Result<AdapterResponse, AdapterError>;

    /// Map a backend failure onto the shared taxonomy.
    fn normalize_error(&self, err: &AdapterError) -> ErrorKind {
        normalize_common(err)
    }
}

/// Build the adapter variant for `config.kind`.
pub fn create_adapter(config: Arc<ProviderConfig>) -> Result<Arc<dyn ProviderAdapter>> {
    let transport = HttpTransport::new(&config)?;
    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        AdapterKind::OpenAi => Arc::new(OpenAiAdapter::new(config, transport)),
        AdapterKind::Anthropic => Arc::new(AnthropicAdapter::new(config, transport)),
        AdapterKind::Gemini => Arc::new(GeminiAdapter::new(config, transport)),
    };
    Ok(adapter)
}

/// POST `body` and decode the JSON reply, turning non-2xx replies into
/// [`AdapterError::Status`] with the provider's own error code when present.
pub(crate) async fn post_and_decode(
    transport: &HttpTransport,
    path: &str,
    headers: &[(String, String)],
    body: &Value,
    request_id: &str,
) -> std::result::Result<(Value, u64), AdapterError> {
    let started = Instant::now();
    let reply = transport.post_json(path, headers, body, request_id).await?;
    let latency_ms = started.elapsed().as_millis() as u64;

    if !reply.is_success() {
        let parsed: Option<Value> = serde_json::from_str(&reply.body).ok();
        let (provider_code, message) = match parsed {
            Some(ref v) => (error_code_of(v), error_message_of(v)),
            None => (None, None),
        };
        return Err(AdapterError::Status {
            status: reply.status,
            provider_code,
            message: message.unwrap_or_else(|| truncate(&reply.body, 256)),
            retry_after_ms: reply.retry_after_ms,
        });
    }

    let value: Value = serde_json::from_str(&reply.body)
        .map_err(|e| AdapterError::Decode(format!("invalid JSON body: {}", e)))?;
    Ok((value, latency_ms))
}

fn error_code_of(v: &Value) -> Option<String> {
    ["/error/code", "/error/type", "/error/status"]
        .iter()
        .filter_map(|p| v.pointer(p).and_then(|c| c.as_str()))
        .find(|s| ErrorKind::from_provider_code(s).is_some())
        .or_else(|| v.pointer("/error/type").and_then(|c| c.as_str()))
        .map(String::from)
}

fn error_message_of(v: &Value) -> Option<String> {
    v.pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(String::from)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

pub(crate) fn bearer(token: &str) -> (String, String) {
    ("authorization".to_string(), format!("Bearer {}", token))
}
