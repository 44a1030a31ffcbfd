//! Scripted provider adapters shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prompt_kernel::adapters::{AdapterCall, AdapterError, AdapterKind, AdapterResponse, ProviderAdapter};
use prompt_kernel::config::{KernelConfig, ProviderConfig};
use prompt_kernel::dispatch::Dispatcher;
use prompt_kernel::ledger::InMemoryStore;
use prompt_kernel::registry::{AdapterFactory, ProviderRegistry};
use prompt_kernel::resilience::retry::RetryPolicy;
use prompt_kernel::types::TokenUsage;

pub const MODEL: &str = "scripted-1";

/// What the adapter does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply,
    /// Fail with this HTTP status.
    Status(u16),
    /// Sleep longer than any test attempt timeout.
    Hang,
    /// Sleep for the number of milliseconds given in the prompt, then reply.
    SleepFromPrompt,
}

/// Plays `script` in order, then repeats `fallback` forever.
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Arc<AtomicU32>,
}

impl ScriptedAdapter {
    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenAi
    }

    async fn execute(&self, call: &AdapterCall) -> Result<AdapterResponse, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply => {}
            Step::Status(code) => return Err(AdapterError::status(code, "scripted failure")),
            Step::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            Step::SleepFromPrompt => {
                let ms: u64 = call.prompt.trim().parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Ok(AdapterResponse {
            text: format!("{}: {}", self.id, call.prompt),
            usage: TokenUsage::new(12, 8),
            provider_latency_ms: 1,
        })
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<InMemoryStore>,
    pub calls: Arc<AtomicU32>,
}

impl Harness {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// One provider `id` backed by a scripted adapter. Every adapter built by the
/// factory shares the same call counter and script.
pub fn harness(provider: ProviderConfig, script: Vec<Step>, fallback: Step) -> Harness {
    harness_with(KernelConfig::new().with_provider(provider), script, fallback)
}

pub fn harness_with(config: KernelConfig, script: Vec<Step>, fallback: Step) -> Harness {
    let calls = Arc::new(AtomicU32::new(0));
    let shared_script = Arc::new(Mutex::new(Some(script)));
    let counter = Arc::clone(&calls);
    let factory: Arc<AdapterFactory> = Arc::new(
        move |pc: Arc<ProviderConfig>| -> prompt_kernel::Result<Arc<dyn ProviderAdapter>> {
            let script = shared_script.lock().unwrap().take().unwrap_or_default();
            Ok(Arc::new(ScriptedAdapter {
                id: pc.id.clone(),
                script: Mutex::new(script.into()),
                fallback: fallback.clone(),
                calls: Arc::clone(&counter),
            }))
        },
    );
    let registry = Arc::new(ProviderRegistry::with_factory(&config, factory).unwrap());
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, store.clone()));
    Harness {
        dispatcher,
        store,
        calls,
    }
}

pub fn provider(id: &str) -> ProviderConfig {
    ProviderConfig::new(id, AdapterKind::OpenAi, "http://localhost:9").with_default_model(MODEL)
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_jitter(false)
        .with_base_backoff(Duration::from_millis(10))
        .with_attempt_timeout(Duration::from_millis(100))
        .with_deadline(Duration::from_secs(60))
}
