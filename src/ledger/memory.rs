use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{ResultStore, UsageLedger, UsageRecord};
use crate::audit::AuditResult;
use crate::batch::BatchReport;
use crate::{Error, ErrorContext, Result};

#[derive(Default)]
struct Inner {
    records: Vec<UsageRecord>,
    seen: HashSet<(String, u32)>,
    audits: HashMap<String, AuditResult>,
    batches: HashMap<String, BatchReport>,
}

/// In-process store for tests and single-binary deployments.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

fn poisoned() -> Error {
    Error::runtime_with_context(
        "in-memory store lock poisoned",
        ErrorContext::new().with_source("in_memory_store"),
    )
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in append order.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.inner
            .read()
            .map(|g| g.records.clone())
            .unwrap_or_default()
    }

    pub fn records_for(&self, request_id: &str) -> Vec<UsageRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn audit(&self, fingerprint: &str) -> Option<AuditResult> {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.audits.get(fingerprint).cloned())
    }

    pub fn batch(&self, batch_id: &str) -> Option<BatchReport> {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.batches.get(batch_id).cloned())
    }

    /// Sum of `cost_usd` over all records.
    pub fn total_cost_usd(&self) -> f64 {
        self.records().iter().map(|r| r.cost_usd).sum()
    }
}

#[async_trait]
impl UsageLedger for InMemoryStore {
    async fn append(&self, record: UsageRecord) -> Result<()> {
        let mut g = self.inner.write().map_err(|_| poisoned())?;
        if g.seen.insert(record.key()) {
            g.records.push(record);
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn save_audit(&self, result: &AuditResult) -> Result<()> {
        let mut g = self.inner.write().map_err(|_| poisoned())?;
        g.audits
            .entry(result.fingerprint.clone())
            .or_insert_with(|| result.clone());
        Ok(())
    }

    async fn save_batch(&self, report: &BatchReport) -> Result<()> {
        let mut g = self.inner.write().map_err(|_| poisoned())?;
        g.batches
            .entry(report.batch_id.clone())
            .or_insert_with(|| report.clone());
        Ok(())
    }
}
