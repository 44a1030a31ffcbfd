use super::{quote_list, PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::Result;

const BROAD: &[&str] = &[
    "everything",
    "all",
    "any",
    "entire",
    "whole",
    "etc",
    "and so on",
    "anything",
    "every",
    "comprehensive",
];

const TASK_VERBS: &[&str] = &[
    "fix",
    "write",
    "create",
    "build",
    "refactor",
    "add",
    "implement",
    "explain",
    "summarize",
    "summarise",
    "translate",
    "design",
    "optimize",
    "optimise",
    "review",
    "document",
    "generate",
    "analyze",
    "analyse",
    "update",
    "improve",
    "debug",
    "rewrite",
    "convert",
    "migrate",
];

/// Prompts with fewer words than this leave the scope to guesswork.
const MIN_WORDS: usize = 6;
/// Long enough to describe its own target even without a file or identifier.
const SELF_ANCHORING_WORDS: usize = 12;

/// Is the task one bounded thing with a concrete target?
#[derive(Debug, Default, Clone, Copy)]
pub struct NarrowScopeRule;

impl RuleModule for NarrowScopeRule {
    fn dimension(&self) -> Dimension {
        Dimension::NarrowScope
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 100;
        let mut issues = Vec::new();

        let broad = prompt.matched(BROAD);
        if !broad.is_empty() {
            score -= (prompt.count_all(&broad) as i32 * 15).min(45);
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::ScopeCreep,
                dim,
                format!("Open-ended quantifiers ({}) widen the task", quote_list(&broad)),
                "Name the exact items in scope, e.g. 'the parse_header function' instead of 'all functions'.",
            ));
        }

        let verbs = prompt.matched(TASK_VERBS);
        if verbs.len() > 2 {
            score -= (15 * (verbs.len() as i32 - 2)).min(40);
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::ScopeCreep,
                dim,
                format!(
                    "Prompt asks for {} different tasks ({})",
                    verbs.len(),
                    quote_list(&verbs)
                ),
                "Split the work into separate prompts with one task each.",
            ));
        }

        let anchored =
            prompt.has_concrete_anchor() || prompt.word_count() >= SELF_ANCHORING_WORDS;
        if !anchored {
            score -= 45;
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::Ambiguity,
                dim,
                "The task names no concrete target",
                "Point at the specific file, function, input or behaviour the task is about.",
            ));
        }

        if prompt.word_count() < MIN_WORDS {
            score -= 20;
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Ambiguity,
                dim,
                format!(
                    "Prompt is only {} words, so the model must guess what is in scope",
                    prompt.word_count()
                ),
                "Add one sentence on what is in scope and what is not.",
            ));
        }

        Ok(RuleOutcome::new(score, issues))
    }
}
