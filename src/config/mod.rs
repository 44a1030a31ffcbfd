//! 配置模块：提供者配置、调度默认值与熔断参数，支持热重载。
//!
//! # Configuration Module
//!
//! A [`KernelConfig`] maps provider identifiers to [`ProviderConfig`]s and carries
//! the dispatch and circuit-breaker defaults. It is loaded once at startup from
//! YAML or JSON and can be reloaded at runtime through
//! [`ProviderRegistry::reload`](crate::registry::ProviderRegistry::reload) or a
//! [`ConfigWatcher`].
//!
//! ```yaml
//! dispatch:
//!   global_concurrency: 16
//! providers:
//!   openai:
//!     kind: openai
//!     base_url: https://api.openai.com/v1
//!     models: [gpt-4o, gpt-4o-mini]
//!     default_model: gpt-4o-mini
//!     credential: env:OPENAI_API_KEY
//!     max_concurrency: 4
//!     rate_limit: { capacity: 60, window_secs: 60 }
//! ```

mod loader;
mod watcher;

pub use watcher::ConfigWatcher;

use crate::adapters::AdapterKind;
use crate::ledger::ModelPricing;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::retry::RetryPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Handle to a credential, resolved at call time. The raw secret is never held
/// in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CredentialRef {
    /// `env:NAME`
    Env(String),
    /// `keyring:service/account`
    Keyring { service: String, account: String },
    /// `none`, for local backends without auth.
    None,
}

impl FromStr for CredentialRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") || s.is_empty() {
            return Ok(CredentialRef::None);
        }
        if let Some(name) = s.strip_prefix("env:") {
            if name.is_empty() {
                return Err(Error::configuration_with_context(
                    "env credential needs a variable name",
                    ErrorContext::new().with_details(s.to_string()),
                ));
            }
            return Ok(CredentialRef::Env(name.to_string()));
        }
        if let Some(rest) = s.strip_prefix("keyring:") {
            if let Some((service, account)) = rest.split_once('/') {
                if !service.is_empty() && !account.is_empty() {
                    return Ok(CredentialRef::Keyring {
                        service: service.to_string(),
                        account: account.to_string(),
                    });
                }
            }
        }
        Err(Error::configuration_with_context(
            "unrecognized credential handle",
            ErrorContext::new()
                .with_details(format!("'{}' (expected env:NAME, keyring:service/account or none)", s)),
        ))
    }
}

impl TryFrom<String> for CredentialRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CredentialRef> for String {
    fn from(value: CredentialRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env(name) => write!(f, "env:{}", name),
            CredentialRef::Keyring { service, account } => {
                write!(f, "keyring:{}/{}", service, account)
            }
            CredentialRef::None => write!(f, "none"),
        }
    }
}

/// Per-provider rate-limit window and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Bucket capacity: calls allowed per window.
    pub capacity: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 60,
            window_secs: 60,
        }
    }
}

impl From<RateLimitSettings> for RateLimiterConfig {
    fn from(s: RateLimitSettings) -> Self {
        RateLimiterConfig::per_window(s.capacity, Duration::from_secs(s.window_secs))
    }
}

fn default_max_concurrency() -> usize {
    4
}

/// Static description of one provider backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Filled from the map key when omitted.
    #[serde(default)]
    pub id: String,
    pub kind: AdapterKind,
    pub base_url: String,
    pub models: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default = "default_credential")]
    pub credential: CredentialRef,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Per-model pricing overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pricing: BTreeMap<String, ModelPricing>,
}

fn default_credential() -> CredentialRef {
    CredentialRef::None
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: AdapterKind, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            models: BTreeSet::new(),
            default_model: None,
            credential: CredentialRef::None,
            max_concurrency: default_max_concurrency(),
            rate_limit: RateLimitSettings::default(),
            timeout_ms: None,
            pricing: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.models.insert(model.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.models.insert(model.clone());
        self.default_model = Some(model);
        self
    }

    pub fn with_credential(mut self, credential: CredentialRef) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_rate_limit(mut self, capacity: u32, window_secs: u64) -> Self {
        self.rate_limit = RateLimitSettings {
            capacity,
            window_secs,
        };
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing.insert(pricing.model.clone(), pricing);
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.contains(model)
    }

    /// The model used when a request carries no override: the configured
    /// default, else the first model in sort order.
    pub fn resolve_default_model(&self) -> Option<&str> {
        self.default_model
            .as_deref()
            .or_else(|| self.models.iter().next().map(String::as_str))
    }

    /// Pricing for `model`: configured override first, then the built-in table.
    pub fn pricing_for(&self, model: &str) -> Option<ModelPricing> {
        self.pricing
            .get(model)
            .cloned()
            .or_else(|| ModelPricing::for_model(model))
    }

    pub fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("providers.{}.{}", self.id, name);
        if self.id.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "provider id is empty",
                ErrorContext::new().with_source("config_validator"),
            ));
        }
        if self.models.is_empty() {
            return Err(Error::configuration_with_context(
                "provider declares no models",
                ErrorContext::new()
                    .with_field_path(field("models"))
                    .with_source("config_validator"),
            ));
        }
        if let Some(ref m) = self.default_model {
            if !self.models.contains(m) {
                return Err(Error::configuration_with_context(
                    "default model is not in the supported set",
                    ErrorContext::new()
                        .with_field_path(field("default_model"))
                        .with_details(m.clone())
                        .with_source("config_validator"),
                ));
            }
        }
        if self.max_concurrency == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrency must be at least 1",
                ErrorContext::new()
                    .with_field_path(field("max_concurrency"))
                    .with_source("config_validator"),
            ));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.window_secs == 0 {
            return Err(Error::configuration_with_context(
                "rate limit capacity and window must be positive",
                ErrorContext::new()
                    .with_field_path(field("rate_limit"))
                    .with_source("config_validator"),
            ));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                "base_url is not a valid URL",
                ErrorContext::new()
                    .with_field_path(field("base_url"))
                    .with_details(e.to_string())
                    .with_source("config_validator"),
            )
        })?;
        Ok(())
    }
}

/// Dispatch defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub global_concurrency: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
    pub deadline_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            global_concurrency: 16,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_timeout_ms: 30_000,
            deadline_ms: 60_000,
        }
    }
}

impl DispatchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_backoff(Duration::from_millis(self.base_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
            .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
            .with_deadline(Duration::from_millis(self.deadline_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig::new()
            .with_failure_threshold(s.failure_threshold)
            .with_window(Duration::from_secs(s.window_secs))
            .with_cooldown(Duration::from_secs(s.cooldown_secs))
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub dispatch: DispatchSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.insert(provider.id.clone(), provider);
        self
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Copy map keys into empty `id` fields.
    pub(crate) fn normalize(&mut self) {
        for (key, p) in self.providers.iter_mut() {
            if p.id.is_empty() {
                p.id = key.clone();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.global_concurrency == 0 {
            return Err(Error::configuration_with_context(
                "global_concurrency must be at least 1",
                ErrorContext::new()
                    .with_field_path("dispatch.global_concurrency")
                    .with_source("config_validator"),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new()
                    .with_field_path("dispatch.max_attempts")
                    .with_source("config_validator"),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure_threshold must be at least 1",
                ErrorContext::new()
                    .with_field_path("circuit_breaker.failure_threshold")
                    .with_source("config_validator"),
            ));
        }
        for (key, p) in &self.providers {
            if &p.id != key {
                return Err(Error::configuration_with_context(
                    "provider id does not match its key",
                    ErrorContext::new()
                        .with_field_path(format!("providers.{}.id", key))
                        .with_details(p.id.clone())
                        .with_source("config_validator"),
                ));
            }
            p.validate()?;
        }
        Ok(())
    }
}
