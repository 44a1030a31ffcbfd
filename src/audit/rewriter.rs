//! Improved-prompt generation.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use super::issue::Issue;
use crate::dispatch::Dispatcher;
use crate::error_code::ErrorKind;
use crate::resilience::retry::RetryPolicy;
use crate::types::{ExecutionRequest, SamplingParams};
use crate::{Error, Result};

/// Produces an improved version of a prompt from its audit findings.
///
/// The only non-deterministic part of an audit. Implementations return an
/// error instead of inventing text when they cannot produce a rewrite.
#[async_trait]
pub trait PromptRewriter: Send + Sync {
    async fn rewrite(&self, prompt: &str, issues: &[Issue]) -> Result<String>;
}

/// Rewrites prompts by executing a meta-prompt on a configured provider.
pub struct DispatchRewriter {
    dispatcher: Arc<Dispatcher>,
    provider: String,
    model: Option<String>,
    policy: RetryPolicy,
}

impl DispatchRewriter {
    pub fn new(dispatcher: Arc<Dispatcher>, provider: impl Into<String>) -> Self {
        let policy = dispatcher.default_policy();
        Self {
            dispatcher,
            provider: provider.into(),
            model: None,
            policy,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl PromptRewriter for DispatchRewriter {
    async fn rewrite(&self, prompt: &str, issues: &[Issue]) -> Result<String> {
        let mut request = ExecutionRequest::new(&self.provider, rewrite_instructions(prompt, issues))
            .with_sampling(SamplingParams::new().with_temperature(0.2));
        if let Some(ref m) = self.model {
            request = request.with_model(m);
        }
        let result = self
            .dispatcher
            .execute(&request, &self.policy)
            .await
            .into_result()?;
        match result.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(Error::dispatch(
                ErrorKind::InternalAdapterError,
                "rewrite returned no text",
            )),
        }
    }
}

pub(crate) fn rewrite_instructions(prompt: &str, issues: &[Issue]) -> String {
    let mut out = String::from(
        "Rewrite the prompt below so it fixes the listed problems. Keep the original intent. \
         Reply with the rewritten prompt only.\n\nProblems:\n",
    );
    if issues.is_empty() {
        out.push_str("- none found; tighten wording only\n");
    }
    for issue in issues {
        let _ = writeln!(
            out,
            "- [{}] {}: {} Fix: {}",
            issue.severity, issue.category, issue.description, issue.suggested_fix
        );
    }
    out.push_str("\nPrompt:\n");
    out.push_str(prompt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::issue::{IssueCategory, Severity};
    use crate::audit::score::Dimension;

    #[test]
    fn instructions_list_every_issue() {
        let issues = vec![
            Issue::new(
                Severity::Critical,
                IssueCategory::MissingConstraint,
                Dimension::ExplicitConstraints,
                "No constraints.",
                "Add limits.",
            ),
            Issue::new(
                Severity::Suggestion,
                IssueCategory::Verbosity,
                Dimension::Simplicity,
                "Filler words.",
                "Drop them.",
            ),
        ];
        let text = rewrite_instructions("Fix the bug", &issues);
        assert!(text.contains("- [critical] missing-constraint: No constraints. Fix: Add limits."));
        assert!(text.contains("- [suggestion] verbosity"));
        assert!(text.ends_with("Prompt:\nFix the bug"));
    }
}
