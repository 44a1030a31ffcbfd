//! Execution request types.

use crate::error_code::ErrorKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sampling knobs forwarded to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Must lie in `[0, 1]` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl SamplingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(Error::dispatch(
                    ErrorKind::InvalidRequest,
                    format!("temperature {} outside [0, 1]", t),
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::dispatch(
                ErrorKind::InvalidRequest,
                "max_tokens must be positive",
            ));
        }
        Ok(())
    }
}

/// Caller identity as supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    /// Entitlement tier; opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// One logical prompt execution.
///
/// Ownership moves to the dispatcher on submission; nothing mutates a request
/// after that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: String,
    pub prompt: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub caller: CallerIdentity,
    pub idempotency_key: String,
}

impl ExecutionRequest {
    pub fn new(provider: impl Into<String>, prompt: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            idempotency_key: id.clone(),
            id,
            prompt: prompt.into(),
            provider: provider.into(),
            model: None,
            sampling: SamplingParams::default(),
            caller: CallerIdentity::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::dispatch(ErrorKind::InvalidRequest, "prompt is empty"));
        }
        if self.provider.trim().is_empty() {
            return Err(Error::dispatch(
                ErrorKind::InvalidRequest,
                "provider identifier is empty",
            ));
        }
        self.sampling.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_ids() {
        let r = ExecutionRequest::new("openai", "hello");
        assert!(!r.id.is_empty());
        assert_eq!(r.id, r.idempotency_key);
        assert_eq!(r.caller.id, "anonymous");
    }

    #[test]
    fn temperature_bounds() {
        assert!(SamplingParams::new().with_temperature(0.0).validate().is_ok());
        assert!(SamplingParams::new().with_temperature(1.0).validate().is_ok());
        let err = SamplingParams::new()
            .with_temperature(1.2)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(SamplingParams::new()
            .with_temperature(f32::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn empty_prompt_rejected() {
        let err = ExecutionRequest::new("openai", "   ").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
