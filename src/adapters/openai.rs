//! OpenAI chat completions adapter. Also serves OpenAI-compatible gateways
//! (DeepSeek, Moonshot, local servers) via `base_url`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    bearer, post_and_decode, AdapterCall, AdapterError, AdapterKind, AdapterResponse,
    ProviderAdapter,
};
use crate::config::ProviderConfig;
use crate::tokens::{CharacterEstimator, TokenCounter};
use crate::transport::HttpTransport;
use crate::types::TokenUsage;

#[derive(Debug)]
pub struct OpenAiAdapter {
    config: Arc<ProviderConfig>,
    transport: HttpTransport,
}

impl OpenAiAdapter {
    pub fn new(config: Arc<ProviderConfig>, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    pub(crate) fn build_body(call: &AdapterCall) -> Value {
        let mut body = json!({
            "model": call.model,
            "messages": [{ "role": "user", "content": call.prompt }],
            "stream": false,
        });
        if let Some(t) = call.sampling.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = call.sampling.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        body
    }

    pub(crate) fn parse_body(
        body: &Value,
        prompt: &str,
    ) -> Result<(String, TokenUsage), AdapterError> {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| AdapterError::Decode("missing choices[0].message.content".into()))?;
        let usage = match body.get("usage") {
            Some(u) => {
                let prompt_tokens = u["prompt_tokens"].as_u64().unwrap_or(0);
                let completion_tokens = u["completion_tokens"].as_u64().unwrap_or(0);
                TokenUsage::new(prompt_tokens, completion_tokens)
            }
            None => CharacterEstimator::new().estimate_usage(prompt, &text),
        };
        Ok((text, usage))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenAi
    }

    async fn execute(&self, call: &AdapterCall) -> Result<AdapterResponse, AdapterError> {
        let mut headers = Vec::new();
        if let Some(token) = self.transport.resolve_credential()? {
            headers.push(bearer(&token));
        }
        let body = Self::build_body(call);
        let (value, latency_ms) = post_and_decode(
            &self.transport,
            "/chat/completions",
            &headers,
            &body,
            &call.request_id,
        )
        .await?;
        let (text, usage) = Self::parse_body(&value, &call.prompt)?;
        Ok(AdapterResponse {
            text,
            usage,
            provider_latency_ms: latency_ms,
        })
    }
}
