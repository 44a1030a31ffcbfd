//! Google Gemini `generateContent` adapter.
//!
//! The model is part of the path (`/models/{model}:generateContent`), sampling
//! lives under `generationConfig`, and the key travels in `x-goog-api-key`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{post_and_decode, AdapterCall, AdapterError, AdapterKind, AdapterResponse, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::tokens::{CharacterEstimator, TokenCounter};
use crate::transport::HttpTransport;
use crate::types::TokenUsage;

#[derive(Debug)]
pub struct GeminiAdapter {
    config: Arc<ProviderConfig>,
    transport: HttpTransport,
}

impl GeminiAdapter {
    pub fn new(config: Arc<ProviderConfig>, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    pub(crate) fn path_for(model: &str) -> String {
        format!("/models/{}:generateContent", model)
    }

    pub(crate) fn build_body(call: &AdapterCall) -> Value {
        let mut generation_config = serde_json::Map::new();
        if let Some(t) = call.sampling.temperature {
            generation_config.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = call.sampling.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(mt));
        }
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": call.prompt }] }],
        });
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }

    pub(crate) fn parse_body(
        body: &Value,
        prompt: &str,
    ) -> Result<(String, TokenUsage), AdapterError> {
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                // A prompt blocked by safety filters comes back without candidates.
                let reason = body
                    .pointer("/promptFeedback/blockReason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("no candidates");
                AdapterError::Decode(format!("empty generateContent reply: {}", reason))
            })?;
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        let usage = match body.get("usageMetadata") {
            Some(u) => TokenUsage::new(
                u["promptTokenCount"].as_u64().unwrap_or(0),
                u["candidatesTokenCount"].as_u64().unwrap_or(0),
            ),
            None => CharacterEstimator::new().estimate_usage(prompt, &text),
        };
        Ok((text, usage))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Gemini
    }

    async fn execute(&self, call: &AdapterCall) -> Result<AdapterResponse, AdapterError> {
        let mut headers = Vec::new();
        if let Some(key) = self.transport.resolve_credential()? {
            headers.push(("x-goog-api-key".to_string(), key));
        }
        let body = Self::build_body(call);
        let (value, latency_ms) = post_and_decode(
            &self.transport,
            &Self::path_for(&call.model),
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
