//! 提示词审计模块：按 KERNEL 六维规则对提示词打分并给出改进建议。
//!
//! # Prompt Audit Module
//!
//! The [`AuditEngine`] evaluates prompt text against a versioned rule set. Each
//! KERNEL dimension is scored by one independent [`RuleModule`]; the engine
//! collects the six scores, orders the issues and derives the aggregate.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AuditEngine`] | Runs a rule set, isolates module failures |
//! | [`AuditResult`] | Scores, ordered issues, optional rewrite, fingerprint |
//! | [`KernelScore`] | The six dimension scores; aggregate is derived |
//! | [`Issue`] | Severity, category, description and suggested fix |
//! | [`RuleSetVersion`] | Versioned rule battery (`kernel-v1`) |
//! | [`PromptRewriter`] | Optional generator of an improved prompt |
//!
//! Scores and issues are a pure function of `(text, rule set)`. Only the
//! rewrite may call out to a model; when it fails the rest of the result is
//! still returned and `improved_version` is `None`.
//!
//! ```rust
//! use prompt_kernel::audit::{AuditEngine, RuleSetVersion};
//!
//! let engine = AuditEngine::new();
//! let result = engine.audit("Fix the bug", RuleSetVersion::V1).unwrap();
//! assert!(result.aggregate_score < 60);
//! assert_eq!(result.aggregate_score, result.score.aggregate());
//! ```

pub mod issue;
mod rewriter;
pub mod rules;
pub mod score;

pub use issue::{sort_issues, Issue, IssueCategory, Severity};
pub use rewriter::{DispatchRewriter, PromptRewriter};
pub use rules::{PromptText, RuleModule, RuleOutcome};
pub use score::{Dimension, DimensionScore, KernelScore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ErrorContext;
use crate::ledger::now_ms;
use crate::{Error, Result};

/// Version of the rule battery. Part of the audit fingerprint, so a rule
/// change never aliases results produced by an older battery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleSetVersion {
    #[default]
    #[serde(rename = "kernel-v1")]
    V1,
}

impl RuleSetVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSetVersion::V1 => "kernel-v1",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kernel-v1" | "v1" => Ok(RuleSetVersion::V1),
            other => Err(Error::validation_with_context(
                format!("unknown rule set version '{}'", other),
                ErrorContext::new()
                    .with_field_path("rule_set")
                    .with_details("supported: kernel-v1"),
            )),
        }
    }
}

impl fmt::Display for RuleSetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of auditing one prompt text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub prompt: String,
    pub rule_set: RuleSetVersion,
    /// Hex SHA-256 of rule set and prompt text.
    pub fingerprint: String,
    pub score: KernelScore,
    /// Critical first, then warnings, then suggestions; detection order within.
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved_version: Option<String>,
    pub aggregate_score: u8,
    pub timestamp_ms: u64,
}

impl AuditResult {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn issues_in(&self, dimension: Dimension) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.dimension == dimension)
    }
}

/// Fingerprint used as storage key and memo key.
pub fn fingerprint(text: &str, version: RuleSetVersion) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// Anything that can audit prompt text. [`crate::batch::BatchRunner`] depends
/// on this rather than on the engine directly.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit_text(&self, text: &str, version: RuleSetVersion) -> Result<AuditResult>;
}

#[derive(Default)]
pub struct AuditEngine {
    /// Replaces the built-in battery when set.
    custom_modules: Option<Vec<Box<dyn RuleModule>>>,
    rewriter: Option<Arc<dyn PromptRewriter>>,
}

impl fmt::Debug for AuditEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditEngine")
            .field(
                "custom_modules",
                &self.custom_modules.as_ref().map(|m| m.len()),
            )
            .field("rewriter", &self.rewriter.is_some())
            .finish()
    }
}

impl AuditEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `modules` instead of the versioned battery. Dimensions with no
    /// module stay unavailable.
    pub fn with_rule_modules(mut self, modules: Vec<Box<dyn RuleModule>>) -> Self {
        self.custom_modules = Some(modules);
        self
    }

    /// Rewriter used by [`Auditor::audit_text`].
    pub fn with_rewriter(mut self, rewriter: Arc<dyn PromptRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    /// Score `text` without generating a rewrite.
    pub fn audit(&self, text: &str, version: RuleSetVersion) -> Result<AuditResult> {
        if text.trim().is_empty() {
            return Err(Error::validation_with_context(
                "prompt text is empty",
                ErrorContext::new().with_field_path("prompt"),
            ));
        }

        let prompt = PromptText::new(text);
        let builtin;
        let modules: &[Box<dyn RuleModule>] = match &self.custom_modules {
            Some(m) => m,
            None => {
                builtin = rules::rule_set(version);
                &builtin
            }
        };

        let mut score = KernelScore::default();
        let mut issues = Vec::new();
        for module in modules {
            let dim = module.dimension();
            match catch_unwind(AssertUnwindSafe(|| module.evaluate(&prompt))) {
                Ok(Ok(outcome)) => {
                    score.set(dim, DimensionScore::Scored(outcome.score));
                    issues.extend(outcome.issues);
                }
                Ok(Err(e)) => {
                    warn!(dimension = dim.name(), error = %e, "rule module failed; dimension unavailable");
                    score.set(dim, DimensionScore::Unavailable);
                }
                Err(_) => {
                    warn!(dimension = dim.name(), "rule module panicked; dimension unavailable");
                    score.set(dim, DimensionScore::Unavailable);
                }
            }
        }
        sort_issues(&mut issues);

        let aggregate_score = score.aggregate();
        debug!(
            rule_set = version.as_str(),
            aggregate_score,
            issues = issues.len(),
            "prompt audited"
        );
        Ok(AuditResult {
            prompt: text.to_string(),
            rule_set: version,
            fingerprint: fingerprint(text, version),
            score,
            issues,
            improved_version: None,
            aggregate_score,
            timestamp_ms: now_ms(),
        })
    }

    /// Score `text`, then ask `rewriter` for an improved version.
    pub async fn audit_with_rewrite(
        &self,
        text: &str,
        version: RuleSetVersion,
        rewriter: &dyn PromptRewriter,
    ) -> Result<AuditResult> {
        let mut result = self.audit(text, version)?;
        match rewriter.rewrite(text, &result.issues).await {
            Ok(improved) => result.improved_version = Some(improved),
            Err(e) => {
                warn!(error_kind = e.kind().name(), error = %e, "prompt rewrite unavailable");
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl Auditor for AuditEngine {
    async fn audit_text(&self, text: &str, version: RuleSetVersion) -> Result<AuditResult> {
        match &self.rewriter {
            Some(r) => self.audit_with_rewrite(text, version, r.as_ref()).await,
            None => self.audit(text, version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorKind;

    struct Exploding;

    impl RuleModule for Exploding {
        fn dimension(&self) -> Dimension {
            Dimension::LogicalStructure
        }

        fn evaluate(&self, _prompt: &PromptText<'_>) -> Result<RuleOutcome> {
            panic!("boom")
        }
    }

    struct Failing;

    impl RuleModule for Failing {
        fn dimension(&self) -> Dimension {
            Dimension::Simplicity
        }

        fn evaluate(&self, _prompt: &PromptText<'_>) -> Result<RuleOutcome> {
            Err(Error::dispatch(ErrorKind::InternalAdapterError, "rule data missing"))
        }
    }

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl PromptRewriter for Fixed {
        async fn rewrite(&self, _prompt: &str, _issues: &[Issue]) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| Error::dispatch(ErrorKind::ProviderUnavailable, "offline"))
        }
    }

    #[test]
    fn fix_the_bug_scores() {
        let r = AuditEngine::new().audit("Fix the bug", RuleSetVersion::V1).unwrap();
        assert_eq!(r.score.simplicity, DimensionScore::Scored(100));
        assert_eq!(r.score.verifiability, DimensionScore::Scored(25));
        assert_eq!(r.score.reproducibility, DimensionScore::Scored(75));
        assert_eq!(r.score.narrow_scope, DimensionScore::Scored(35));
        assert_eq!(r.score.explicit_constraints, DimensionScore::Scored(10));
        assert_eq!(r.score.logical_structure, DimensionScore::Scored(60));
        // 305 / 6 = 50.83
        assert_eq!(r.aggregate_score, 51);
        assert_eq!(r.issues[0].severity, Severity::Critical);
        assert_eq!(r.issues[0].category, IssueCategory::MissingConstraint);
    }

    #[test]
    fn issues_are_ordered_by_severity() {
        let r = AuditEngine::new()
            .audit(
                "Please just refactor everything, add all the tests and write docs for the latest code",
                RuleSetVersion::V1,
            )
            .unwrap();
        let ranks: Vec<u8> = r.issues.iter().map(|i| i.severity.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn failing_modules_degrade_one_dimension() {
        let modules: Vec<Box<dyn RuleModule>> = vec![
            Box::new(Failing),
            Box::new(rules::VerifiabilityRule),
            Box::new(Exploding),
        ];
        let r = AuditEngine::new()
            .with_rule_modules(modules)
            .audit("Fix the bug", RuleSetVersion::V1)
            .unwrap();
        assert_eq!(r.score.simplicity, DimensionScore::Unavailable);
        assert_eq!(r.score.logical_structure, DimensionScore::Unavailable);
        assert_eq!(r.score.verifiability, DimensionScore::Scored(25));
        assert_eq!(r.aggregate_score, 25);
    }

    #[test]
    fn empty_prompt_is_invalid() {
        let err = AuditEngine::new().audit("  \n", RuleSetVersion::V1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn rule_set_parsing() {
        assert_eq!(RuleSetVersion::parse("kernel-v1").unwrap(), RuleSetVersion::V1);
        assert_eq!(RuleSetVersion::parse("V1").unwrap(), RuleSetVersion::V1);
        let err = RuleSetVersion::parse("kernel-v9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            serde_json::to_string(&RuleSetVersion::V1).unwrap(),
            "\"kernel-v1\""
        );
    }

    #[test]
    fn fingerprint_depends_on_text() {
        let a = fingerprint("Fix the bug", RuleSetVersion::V1);
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("Fix the bug", RuleSetVersion::V1));
        assert_ne!(a, fingerprint("Fix the bug.", RuleSetVersion::V1));
    }

    #[tokio::test]
    async fn rewrite_fills_improved_version() {
        let engine = AuditEngine::new();
        let r = engine
            .audit_with_rewrite("Fix the bug", RuleSetVersion::V1, &Fixed(Some("Fix the panic in src/lib.rs")))
            .await
            .unwrap();
        assert_eq!(r.improved_version.as_deref(), Some("Fix the panic in src/lib.rs"));
    }

    #[tokio::test]
    async fn failed_rewrite_keeps_scores() {
        let engine = AuditEngine::new().with_rewriter(Arc::new(Fixed(None)));
        let r = engine.audit_text("Fix the bug", RuleSetVersion::V1).await.unwrap();
        assert!(r.improved_version.is_none());
        assert_eq!(r.aggregate_score, 51);
    }
}
