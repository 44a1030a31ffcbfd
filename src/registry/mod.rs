//! 提供者注册表：以原子快照持有适配器、熔断器与限流器，支持无停机热重载
//!
//! Provider registry. Holds one [`ProviderEntry`] per configured provider inside
//! an immutable [`RegistrySnapshot`], published through `ArcSwap`. A reload
//! builds a complete new snapshot and swaps it in; resolutions already in flight
//! keep the snapshot they captured.
//!
//! Circuit breakers and rate limiters are per-provider and live inside the
//! entries, so contention on one provider never touches another. On reload they
//! are carried over when the settings that shaped them did not change.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::adapters::{create_adapter, AdapterKind, ProviderAdapter};
use crate::config::{CircuitBreakerSettings, DispatchSettings, KernelConfig, ProviderConfig};
use crate::error_code::ErrorKind;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::rate_limiter::RateLimiter;
use crate::{Error, ErrorContext, Result};

/// Builds the adapter for one provider config.
pub type AdapterFactory =
    dyn Fn(Arc<ProviderConfig>) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync;

/// Everything the dispatcher needs for one provider.
pub struct ProviderEntry {
    pub config: Arc<ProviderConfig>,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub breaker: Arc<CircuitBreaker>,
    /// Keyed by (provider, credential): replaced when the credential changes.
    pub limiter: Arc<RateLimiter>,
    /// Per-provider concurrency cap.
    pub inflight: Arc<Semaphore>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.config.id)
            .field("kind", &self.config.kind)
            .finish()
    }
}

/// A resolved dispatch target.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: Arc<ProviderEntry>,
    pub model: String,
}

/// Immutable view of the registry at one point in time.
#[derive(Debug)]
pub struct RegistrySnapshot {
    providers: HashMap<String, Arc<ProviderEntry>>,
    dispatch: DispatchSettings,
    circuit_breaker: CircuitBreakerSettings,
    /// Monotonic generation, bumped on every reload.
    generation: u64,
}

impl RegistrySnapshot {
    pub fn resolve(&self, provider_id: &str, model: Option<&str>) -> Result<Resolved> {
        let entry = self.providers.get(provider_id).ok_or_else(|| {
            Error::dispatch(
                ErrorKind::UnknownProvider,
                format!("provider '{}' is not configured", provider_id),
            )
        })?;
        let model = match model {
            Some(m) if entry.config.supports_model(m) => m.to_string(),
            Some(m) => {
                return Err(Error::dispatch(
                    ErrorKind::UnsupportedModel,
                    format!("model '{}' is not served by provider '{}'", m, provider_id),
                ))
            }
            None => entry
                .config
                .resolve_default_model()
                .map(String::from)
                .ok_or_else(|| {
                    Error::dispatch(
                        ErrorKind::UnsupportedModel,
                        format!("provider '{}' has no default model", provider_id),
                    )
                })?,
        };
        Ok(Resolved {
            entry: Arc::clone(entry),
            model,
        })
    }

    pub fn get(&self, provider_id: &str) -> Option<&Arc<ProviderEntry>> {
        self.providers.get(provider_id)
    }

    /// Provider ids in sorted order.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn dispatch_settings(&self) -> &DispatchSettings {
        &self.dispatch
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Health report for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub kind: AdapterKind,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_remaining_ms: Option<u64>,
    pub tokens_available: f64,
    pub inflight_permits: usize,
    pub healthy: bool,
}

pub struct ProviderRegistry {
    current: ArcSwap<RegistrySnapshot>,
    factory: Arc<AdapterFactory>,
    // Serializes writers; readers never take it.
    reload_lock: Mutex<()>,
}

impl ProviderRegistry {
    /// Build with the HTTP adapters selected by each provider's `kind`.
    pub fn new(config: &KernelConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(create_adapter))
    }

    /// Build with a custom adapter factory.
    pub fn with_factory(config: &KernelConfig, factory: Arc<AdapterFactory>) -> Result<Self> {
        let snapshot = build_snapshot(config, factory.as_ref(), None)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            factory,
            reload_lock: Mutex::new(()),
        })
    }

    /// The snapshot current at the time of the call.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn resolve(&self, provider_id: &str, model: Option<&str>) -> Result<Resolved> {
        self.current.load().resolve(provider_id, model)
    }

    /// Providers whose circuit currently admits calls, sorted by id.
    pub fn list_healthy(&self) -> Vec<String> {
        let snap = self.current.load();
        snap.provider_ids()
            .into_iter()
            .filter(|id| snap.providers.get(id).map_or(false, |e| !e.breaker.is_open()))
            .collect()
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        let snap = self.current.load();
        snap.provider_ids()
            .into_iter()
            .filter_map(|id| snap.providers.get(&id).map(|e| (id, Arc::clone(e))))
            .map(|(id, e)| {
                let cb = e.breaker.snapshot();
                let rl = e.limiter.snapshot();
                ProviderHealth {
                    provider: id,
                    kind: e.config.kind,
                    healthy: cb.state != CircuitState::Open,
                    circuit: cb.state,
                    consecutive_failures: cb.consecutive_failures,
                    open_remaining_ms: cb.open_remaining_ms,
                    tokens_available: rl.tokens,
                    inflight_permits: e.inflight.available_permits(),
                }
            })
            .collect()
    }

    /// Replace the whole snapshot atomically. An invalid config leaves the
    /// current snapshot in place.
    pub fn reload(&self, config: &KernelConfig) -> Result<()> {
        let _guard = self.reload_lock.lock().map_err(|_| {
            Error::runtime_with_context(
                "registry reload lock poisoned",
                ErrorContext::new().with_source("provider_registry"),
            )
        })?;
        let previous = self.current.load_full();
        let next = match build_snapshot(config, self.factory.as_ref(), Some(&previous)) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "registry reload rejected; keeping previous snapshot");
                return Err(e);
            }
        };
        info!(
            generation = next.generation,
            providers = next.len(),
            "provider registry reloaded"
        );
        self.current.store(Arc::new(next));
        Ok(())
    }
}

fn build_snapshot(
    config: &KernelConfig,
    factory: &AdapterFactory,
    previous: Option<&RegistrySnapshot>,
) -> Result<RegistrySnapshot> {
    let mut config = config.clone();
    config.normalize();
    config.validate()?;

    let mut providers = HashMap::with_capacity(config.providers.len());
    for (id, pc) in config.providers {
        let pc = Arc::new(pc);
        let adapter = factory(Arc::clone(&pc))?;
        let prev = previous.and_then(|p| p.providers.get(&id));

        let breaker = match prev {
            Some(old) if previous.map(|p| p.circuit_breaker) == Some(config.circuit_breaker) => {
                Arc::clone(&old.breaker)
            }
            _ => Arc::new(CircuitBreaker::new(config.circuit_breaker.into())),
        };
        let limiter = match prev {
            Some(old)
                if old.config.credential == pc.credential
                    && old.config.rate_limit == pc.rate_limit =>
            {
                Arc::clone(&old.limiter)
            }
            _ => Arc::new(RateLimiter::new(pc.rate_limit.into())),
        };
        let inflight = match prev {
            Some(old) if old.config.max_concurrency == pc.max_concurrency => {
                Arc::clone(&old.inflight)
            }
            _ => Arc::new(Semaphore::new(pc.max_concurrency)),
        };

        providers.insert(
            id,
            Arc::new(ProviderEntry {
                config: pc,
                adapter,
                breaker,
                limiter,
                inflight,
            }),
        );
    }

    Ok(RegistrySnapshot {
        providers,
        dispatch: config.dispatch,
        circuit_breaker: config.circuit_breaker,
        generation: previous.map_or(0, |p| p.generation + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialRef;

    fn config() -> KernelConfig {
        KernelConfig::new()
            .with_provider(
                ProviderConfig::new("openai", AdapterKind::OpenAi, "https://api.openai.com/v1")
                    .with_default_model("gpt-4o-mini")
                    .with_model("gpt-4o"),
            )
            .with_provider(
                ProviderConfig::new("anthropic", AdapterKind::Anthropic, "https://api.anthropic.com/v1")
                    .with_model("claude-3-5-sonnet"),
            )
    }

    #[test]
    fn resolve_contract() {
        let reg = ProviderRegistry::new(&config()).unwrap();
        let r = reg.resolve("openai", None).unwrap();
        assert_eq!(r.model, "gpt-4o-mini");
        assert_eq!(reg.resolve("openai", Some("gpt-4o")).unwrap().model, "gpt-4o");

        let err = reg.resolve("mistral", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
        let err = reg.resolve("openai", Some("gpt-5")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedModel);
    }

    #[test]
    fn list_healthy_skips_open_circuits() {
        let reg = ProviderRegistry::new(&config()).unwrap();
        assert_eq!(reg.list_healthy(), vec!["anthropic", "openai"]);
        let snap = reg.snapshot();
        let breaker = &snap.get("openai").unwrap().breaker;
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert_eq!(reg.list_healthy(), vec!["anthropic"]);
        let health = reg.health();
        let openai = health.iter().find(|h| h.provider == "openai").unwrap();
        assert!(!openai.healthy);
        assert_eq!(openai.circuit, CircuitState::Open);
    }

    #[test]
    fn reload_swaps_and_keeps_captured_snapshot() {
        let reg = ProviderRegistry::new(&config()).unwrap();
        let before = reg.snapshot();

        let next = KernelConfig::new().with_provider(
            ProviderConfig::new("openai", AdapterKind::OpenAi, "https://api.openai.com/v1")
                .with_model("gpt-4o"),
        );
        reg.reload(&next).unwrap();

        assert!(before.get("anthropic").is_some());
        assert!(reg.resolve("anthropic", None).is_err());
        assert_eq!(reg.snapshot().generation(), before.generation() + 1);
    }

    #[test]
    fn reload_carries_breaker_state_and_resets_limiter_on_credential_change() {
        let reg = ProviderRegistry::new(&config()).unwrap();
        let old = reg.snapshot();
        let old_entry = old.get("openai").unwrap();
        old_entry.breaker.on_failure();

        let mut next = config();
        if let Some(p) = next.providers.get_mut("openai") {
            p.credential = CredentialRef::Env("OTHER_KEY".into());
        }
        reg.reload(&next).unwrap();

        let new = reg.snapshot();
        let new_entry = new.get("openai").unwrap();
        assert!(Arc::ptr_eq(&old_entry.breaker, &new_entry.breaker));
        assert!(!Arc::ptr_eq(&old_entry.limiter, &new_entry.limiter));
        let anth_old = old.get("anthropic").unwrap();
        let anth_new = new.get("anthropic").unwrap();
        assert!(Arc::ptr_eq(&anth_old.limiter, &anth_new.limiter));
    }

    #[test]
    fn invalid_reload_keeps_previous() {
        let reg = ProviderRegistry::new(&config()).unwrap();
        let mut bad = config();
        if let Some(p) = bad.providers.get_mut("openai") {
            p.models.clear();
        }
        assert!(reg.reload(&bad).is_err());
        assert!(reg.resolve("openai", None).is_ok());
        assert_eq!(reg.snapshot().generation(), 0);
    }
}
