//! Anthropic Messages API adapter.
//!
//! Differences from the OpenAI shape:
//! - Auth goes in `x-api-key`, plus a pinned `anthropic-version` header.
//! - Content is a list of typed blocks; the reply text is the concatenation of
//!   its `text` blocks.
//! - `max_tokens` is required.
//! - Usage is reported as `input_tokens` / `output_tokens`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{post_and_decode, AdapterCall, AdapterError, AdapterKind, AdapterResponse, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error_code::ErrorKind;
use crate::tokens::{CharacterEstimator, TokenCounter};
use crate::transport::HttpTransport;
use crate::types::TokenUsage;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicAdapter {
    config: Arc<ProviderConfig>,
    transport: HttpTransport,
}

impl AnthropicAdapter {
    pub fn new(config: Arc<ProviderConfig>, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    pub(crate) fn build_body(call: &AdapterCall) -> Value {
        let mut body = json!({
            "model": call.model,
            "max_tokens": call.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": call.prompt }],
            }],
        });
        if let Some(t) = call.sampling.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    pub(crate) fn parse_body(
        body: &Value,
        prompt: &str,
    ) -> Result<(String, TokenUsage), AdapterError> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| AdapterError::Decode("missing content blocks".into()))?;
        let text: String = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        let usage = match body.get("usage") {
            Some(u) => TokenUsage::new(
                u["input_tokens"].as_u64().unwrap_or(0),
                u["output_tokens"].as_u64().unwrap_or(0),
            ),
            None => CharacterEstimator::new().estimate_usage(prompt, &text),
        };
        Ok((text, usage))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Anthropic
    }

    async fn execute(&self, call: &AdapterCall) -> Result<AdapterResponse, AdapterError> {
        let mut headers = vec![(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        )];
        if let Some(key) = self.transport.resolve_credential()? {
            headers.push(("x-api-key".to_string(), key));
        }
        let body = Self::build_body(call);
        let (value, latency_ms) =
            post_and_decode(&self.transport, "/messages", &headers, &body, &call.request_id)
                .await?;
        let (text, usage) = Self::parse_body(&value, &call.prompt)?;
        Ok(AdapterResponse {
            text,
            usage,
            provider_latency_ms: latency_ms,
        })
    }

    fn normalize_error(&self, err: &AdapterError) -> ErrorKind {
        match err {
            // 529: overloaded
            AdapterError::Status { status: 529, .. } => ErrorKind::ServerError,
            _ => super::normalize_common(err),
        }
    }
}
