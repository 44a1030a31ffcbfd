//! 批量测试模块：在多个提供方上执行多条提示词，并汇总审计与执行指标。
//!
//! # Batch Module
//!
//! [`BatchRunner::run`] executes every `(prompt, provider)` pair through the
//! [`Dispatcher`] and, when enabled, audits each distinct prompt text once.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchRunner`] | Fans cells out, memoizes audits, finalizes the report |
//! | [`BatchReport`] | Ordered cells plus [`BatchSummary`] statistics |
//! | [`BatchReportBuilder`] | Accepts cells in completion order, emits a report only when full |
//! | [`BatchProgress`] | Per-cell completion event passed to the progress callback |
//!
//! Cells are ordered row-major: all providers for the first prompt, then all
//! providers for the second, and so on, whatever the completion order.

mod report;

pub use report::{BatchCell, BatchReport, BatchReportBuilder, BatchSummary};

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{fingerprint, AuditResult, Auditor, RuleSetVersion};
use crate::dispatch::Dispatcher;
use crate::error::ErrorContext;
use crate::ledger::ResultStore;
use crate::resilience::retry::RetryPolicy;
use crate::types::{CallerIdentity, ExecutionRequest, ExecutionStatus};
use crate::{Error, Result};

/// One finished cell, as seen by a progress callback.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub batch_id: String,
    pub index: usize,
    pub provider: String,
    pub status: ExecutionStatus,
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

pub struct BatchRunner {
    dispatcher: Arc<Dispatcher>,
    auditor: Arc<dyn Auditor>,
    store: Option<Arc<dyn ResultStore>>,
    policy: Option<RetryPolicy>,
    concurrency: usize,
    rule_set: RuleSetVersion,
    caller: CallerIdentity,
    progress: Option<ProgressCallback>,
}

impl BatchRunner {
    pub fn new(dispatcher: Arc<Dispatcher>, auditor: Arc<dyn Auditor>) -> Self {
        Self {
            dispatcher,
            auditor,
            store: None,
            policy: None,
            concurrency: 0,
            rule_set: RuleSetVersion::default(),
            caller: CallerIdentity::default(),
            progress: None,
        }
    }

    /// Save audits and the finished report here.
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Retry policy for every cell; defaults to the configured one.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Cells in flight at once. 0 uses the global cap.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn with_rule_set(mut self, version: RuleSetVersion) -> Self {
        self.rule_set = version;
        self
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Execute every prompt on every provider and build the report.
    ///
    /// Returns only after every cell is terminal. Cell failures are recorded
    /// in the report; only an empty batch or a report that cannot be completed
    /// is an error.
    pub async fn run(
        &self,
        prompts: &[String],
        providers: &[String],
        audit_enabled: bool,
    ) -> Result<BatchReport> {
        if prompts.is_empty() || providers.is_empty() {
            return Err(Error::validation_with_context(
                "a batch needs at least one prompt and one provider",
                ErrorContext::new().with_field_path(if prompts.is_empty() {
                    "prompts"
                } else {
                    "providers"
                }),
            ));
        }
        let batch_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "batch",
            batch_id = %batch_id,
            prompts = prompts.len(),
            providers = providers.len()
        );
        self.run_inner(batch_id, prompts, providers, audit_enabled)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        batch_id: String,
        prompts: &[String],
        providers: &[String],
        audit_enabled: bool,
    ) -> Result<BatchReport> {
        let audits = if audit_enabled {
            self.audit_distinct(prompts).await
        } else {
            HashMap::new()
        };

        let total = prompts.len() * providers.len();
        let mut builder = BatchReportBuilder::new(&batch_id, self.rule_set, total);
        let policy = self
            .policy
            .clone()
            .unwrap_or_else(|| self.dispatcher.default_policy());
        let global_cap = self
            .dispatcher
            .registry()
            .snapshot()
            .dispatch_settings()
            .global_concurrency;
        let limit = match self.concurrency {
            0 => global_cap,
            n => n.min(global_cap),
        }
        .max(1);

        let cells = prompts
            .iter()
            .flat_map(|p| providers.iter().map(move |prov| (p, prov)))
            .enumerate()
            .map(|(index, (prompt, provider))| {
                let request = ExecutionRequest::new(provider, prompt).with_caller(self.caller.clone());
                (index, request)
            });

        let dispatcher = &self.dispatcher;
        let policy = &policy;
        let mut completions = futures::stream::iter(cells)
            .map(|(index, request)| async move {
                let result = dispatcher.execute(&request, policy).await;
                (index, request, result)
            })
            .buffer_unordered(limit);

        while let Some((index, request, result)) = completions.next().await {
            let status = result.status;
            let cost_usd = result.cost_usd;
            let audit = audits.get(&fingerprint(&request.prompt, self.rule_set)).cloned();
            builder.insert(BatchCell {
                index,
                prompt: request.prompt,
                provider: request.provider.clone(),
                result,
                cost_usd,
                audit,
            })?;
            if let Some(ref cb) = self.progress {
                cb(&BatchProgress {
                    batch_id: batch_id.clone(),
                    index,
                    provider: request.provider,
                    status,
                    completed: builder.completed(),
                    total,
                });
            }
        }

        let report = builder.finalize()?;
        info!(
            cells = report.summary.total_cells,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            total_cost_usd = report.summary.total_cost_usd,
            "batch finished"
        );
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_batch(&report).await {
                warn!(error = %e, "failed to save batch report");
            }
        }
        Ok(report)
    }

    /// Audit each distinct prompt text once, keyed by fingerprint.
    async fn audit_distinct(&self, prompts: &[String]) -> HashMap<String, AuditResult> {
        let mut audits = HashMap::new();
        for prompt in prompts {
            let key = fingerprint(prompt, self.rule_set);
            if audits.contains_key(&key) {
                continue;
            }
            match self.auditor.audit_text(prompt, self.rule_set).await {
                Ok(result) => {
                    if let Some(ref store) = self.store {
                        if let Err(e) = store.save_audit(&result).await {
                            warn!(error = %e, "failed to save audit result");
                        }
                    }
                    audits.insert(key, result);
                }
                Err(e) => {
                    warn!(error_kind = e.kind().name(), error = %e, "prompt audit failed");
                }
            }
        }
        audits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterCall, AdapterError, AdapterKind, AdapterResponse, ProviderAdapter};
    use crate::audit::AuditEngine;
    use crate::config::{KernelConfig, ProviderConfig};
    use crate::ledger::{InMemoryStore, ModelPricing};
    use crate::registry::{AdapterFactory, ProviderRegistry};
    use crate::types::TokenUsage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Echo {
        id: String,
    }

    #[async_trait]
    impl ProviderAdapter for Echo {
        fn provider_id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> AdapterKind {
            AdapterKind::OpenAi
        }

        async fn execute(&self, call: &AdapterCall) -> std::result::Result<AdapterResponse, AdapterError> {
            if self.id == "down" {
                return Err(AdapterError::status(401, "bad key"));
            }
            if let Ok(ms) = call.prompt.parse::<u64>() {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            }
            Ok(AdapterResponse {
                text: call.prompt.to_uppercase(),
                usage: TokenUsage::new(1000, 1000),
                provider_latency_ms: 1,
            })
        }
    }

    fn priced_config() -> KernelConfig {
        KernelConfig::new()
            .with_provider(
                ProviderConfig::new("up", AdapterKind::OpenAi, "http://localhost")
                    .with_model("m")
                    .with_pricing(ModelPricing::new("m", 1.0, 2.0)),
            )
            .with_provider(ProviderConfig::new("down", AdapterKind::OpenAi, "http://localhost").with_model("m"))
    }

    fn runner(store: Arc<InMemoryStore>) -> BatchRunner {
        let cfg = priced_config();
        let factory: Arc<AdapterFactory> = Arc::new(
            |c: Arc<ProviderConfig>| -> crate::Result<Arc<dyn ProviderAdapter>> {
                Ok(Arc::new(Echo { id: c.id.clone() }))
            },
        );
        let registry = Arc::new(ProviderRegistry::with_factory(&cfg, factory).unwrap());
        let dispatcher = Arc::new(Dispatcher::without_ledger(registry));
        BatchRunner::new(dispatcher, Arc::new(AuditEngine::new())).with_store(store)
    }

    #[tokio::test]
    async fn cells_are_row_major_with_isolated_failures() {
        let store = Arc::new(InMemoryStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = runner(store.clone())
            .with_progress(Arc::new(move |p: &BatchProgress| {
                sink.lock().unwrap().push(p.completed);
            }))
            .run(
                &["Fix the bug".to_string(), "List 3 risks".to_string()],
                &["up".to_string(), "down".to_string()],
                true,
            )
            .await
            .unwrap();

        let layout: Vec<(&str, &str)> = report
            .cells
            .iter()
            .map(|c| (c.prompt.as_str(), c.provider.as_str()))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("Fix the bug", "up"),
                ("Fix the bug", "down"),
                ("List 3 risks", "up"),
                ("List 3 risks", "down"),
            ]
        );
        assert_eq!(report.cells[0].result.text.as_deref(), Some("FIX THE BUG"));
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 2);
        // 1k in at 1.0 + 1k out at 2.0, twice
        assert!((report.summary.total_cost_usd - 6.0).abs() < 1e-9);
        assert!(report.cells.iter().all(|c| c.audit.is_some()));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert!(store.batch(&report.batch_id).is_some());
        let fp = &report.cells[0].audit.as_ref().unwrap().fingerprint;
        assert!(store.audit(fp).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cells_keep_the_price_they_were_dispatched_under() {
        let runner = runner(Arc::new(InMemoryStore::new()));
        let registry = Arc::clone(runner.dispatcher.registry());
        let unpriced = KernelConfig::new()
            .with_provider(ProviderConfig::new("up", AdapterKind::OpenAi, "http://localhost").with_model("m"));
        let report = runner
            .with_concurrency(2)
            .with_progress(Arc::new(move |p: &BatchProgress| {
                if p.completed == 1 {
                    registry.reload(&unpriced).unwrap();
                }
            }))
            .run(&["20".to_string(), "5".to_string()], &["up".to_string()], false)
            .await
            .unwrap();

        // Both cells were dispatched before the reload dropped the price.
        assert!(report.cells.iter().all(|c| (c.cost_usd - 3.0).abs() < 1e-9));
        assert!(report.cells.iter().all(|c| c.cost_usd == c.result.cost_usd));
        assert!((report.summary.total_cost_usd - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn audit_disabled_leaves_cells_unaudited() {
        let report = runner(Arc::new(InMemoryStore::new()))
            .run(&["Fix the bug".to_string()], &["up".to_string()], false)
            .await
            .unwrap();
        assert!(report.cells[0].audit.is_none());
        assert!(report.summary.mean_audit_score.is_none());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let err = runner(Arc::new(InMemoryStore::new()))
            .run(&[], &["up".to_string()], true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error_code::ErrorKind::InvalidRequest);
    }
}
