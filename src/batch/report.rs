//! Batch report and its incremental builder.

use serde::{Deserialize, Serialize};

use crate::audit::{AuditResult, RuleSetVersion};
use crate::error::ErrorContext;
use crate::ledger::now_ms;
use crate::types::{ExecutionResult, ExecutionStatus};
use crate::{Error, Result};

/// One `(prompt, provider)` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCell {
    /// Position in the report, row-major over prompts then providers.
    pub index: usize,
    pub prompt: String,
    pub provider: String,
    pub result: ExecutionResult,
    /// Cost of the terminal attempt in USD.
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_cells: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Cells that ended in `Timeout` or `DeadlineExceeded`; also counted in `failed`.
    pub timed_out: usize,
    pub mean_latency_ms: f64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    /// Mean aggregate audit score over distinct audited prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_audit_score: Option<f64>,
}

impl BatchSummary {
    fn from_cells(cells: &[BatchCell]) -> Self {
        let total_cells = cells.len();
        let succeeded = cells.iter().filter(|c| c.result.is_success()).count();
        let timed_out = cells
            .iter()
            .filter(|c| c.result.status == ExecutionStatus::TimedOut)
            .count();
        let latency: u64 = cells.iter().map(|c| c.result.latency_ms).sum();

        let mut seen = std::collections::HashSet::new();
        let scores: Vec<f64> = cells
            .iter()
            .filter_map(|c| c.audit.as_ref())
            .filter(|a| seen.insert(a.fingerprint.as_str()))
            .map(|a| a.aggregate_score as f64)
            .collect();

        Self {
            total_cells,
            succeeded,
            failed: total_cells - succeeded,
            timed_out,
            mean_latency_ms: if total_cells == 0 {
                0.0
            } else {
                latency as f64 / total_cells as f64
            },
            total_cost_usd: cells.iter().map(|c| c.cost_usd).sum(),
            total_tokens: cells.iter().map(|c| c.result.usage.total_tokens).sum(),
            mean_audit_score: if scores.is_empty() {
                None
            } else {
                Some(scores.iter().sum::<f64>() / scores.len() as f64)
            },
        }
    }
}

/// A finalized batch. Only [`BatchReportBuilder::finalize`] creates one, and
/// only once every cell is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub rule_set: RuleSetVersion,
    pub cells: Vec<BatchCell>,
    pub summary: BatchSummary,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

impl BatchReport {
    pub fn cell(&self, prompt_idx: usize, provider_idx: usize, providers: usize) -> Option<&BatchCell> {
        self.cells.get(prompt_idx * providers + provider_idx)
    }
}

/// Collects cells as they complete, in any order.
#[derive(Debug)]
pub struct BatchReportBuilder {
    batch_id: String,
    rule_set: RuleSetVersion,
    slots: Vec<Option<BatchCell>>,
    filled: usize,
    started_at_ms: u64,
}

impl BatchReportBuilder {
    pub fn new(batch_id: impl Into<String>, rule_set: RuleSetVersion, cells: usize) -> Self {
        Self {
            batch_id: batch_id.into(),
            rule_set,
            slots: (0..cells).map(|_| None).collect(),
            filled: 0,
            started_at_ms: now_ms(),
        }
    }

    pub fn insert(&mut self, cell: BatchCell) -> Result<()> {
        let idx = cell.index;
        let slot = self.slots.get_mut(idx).ok_or_else(|| {
            Error::runtime_with_context(
                format!("batch cell {} out of range", idx),
                ErrorContext::new().with_source("batch"),
            )
        })?;
        if slot.is_some() {
            return Err(Error::runtime_with_context(
                format!("batch cell {} completed twice", idx),
                ErrorContext::new().with_source("batch"),
            ));
        }
        *slot = Some(cell);
        self.filled += 1;
        Ok(())
    }

    pub fn completed(&self) -> usize {
        self.filled
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Consume the builder. Fails while any cell is still pending.
    pub fn finalize(self) -> Result<BatchReport> {
        if !self.is_complete() {
            return Err(Error::runtime_with_context(
                format!(
                    "batch {} has {} of {} cells",
                    self.batch_id,
                    self.filled,
                    self.slots.len()
                ),
                ErrorContext::new().with_source("batch"),
            ));
        }
        let cells: Vec<BatchCell> = self.slots.into_iter().flatten().collect();
        let summary = BatchSummary::from_cells(&cells);
        Ok(BatchReport {
            batch_id: self.batch_id,
            rule_set: self.rule_set,
            cells,
            summary,
            started_at_ms: self.started_at_ms,
            finished_at_ms: now_ms(),
        })
    }
}
