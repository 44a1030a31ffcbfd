use super::{quote_list, PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::Result;

const TEMPORAL: &[&str] = &[
    "today",
    "now",
    "currently",
    "current",
    "latest",
    "recent",
    "recently",
    "yesterday",
    "tomorrow",
    "this week",
    "this month",
    "this year",
    "nowadays",
    "up to date",
];

const OPEN_ENDED: &[&str] = &[
    "random",
    "randomly",
    "surprise me",
    "be creative",
    "anything",
    "whatever",
];

/// Definite references to material the prompt does not carry.
const ARTIFACT_REFS: &[&str] = &[
    "the bug",
    "the error",
    "the issue",
    "the problem",
    "the code",
    "the file",
    "the function",
    "the script",
    "the app",
    "the project",
    "the repo",
    "the test",
    "this code",
    "this file",
    "this bug",
    "that bug",
];

/// Would two runs of the prompt, on different days or by different people,
/// ask for the same thing?
#[derive(Debug, Default, Clone, Copy)]
pub struct ReproducibilityRule;

impl RuleModule for ReproducibilityRule {
    fn dimension(&self) -> Dimension {
        Dimension::Reproducibility
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 100;
        let mut issues = Vec::new();

        let temporal = prompt.matched(TEMPORAL);
        if !temporal.is_empty() {
            score -= (prompt.count_all(&temporal) as i32 * 15).min(45);
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::TimeSensitive,
                dim,
                format!(
                    "Time-relative wording ({}) changes meaning between runs",
                    quote_list(&temporal)
                ),
                "Replace relative dates with absolute ones, e.g. 'as of 2024-06-01'.",
            ));
        }

        let has_context = prompt.has_code_block() || prompt.has_concrete_anchor();
        let refs = prompt.matched(ARTIFACT_REFS);
        if !refs.is_empty() && !has_context {
            score -= (prompt.count_all(&refs) as i32 * 25).min(50);
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::MissingContext,
                dim,
                format!("Refers to {} without including it", quote_list(&refs)),
                "Paste the relevant code or error message, or name the file and function.",
            ));
        }

        let open = prompt.matched(OPEN_ENDED);
        if !open.is_empty() {
            score -= (prompt.count_all(&open) as i32 * 10).min(30);
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Nondeterminism,
                dim,
                format!(
                    "Open-ended wording ({}) invites a different answer each run",
                    quote_list(&open)
                ),
                "Pin the choices the model would otherwise make at random.",
            ));
        }

        Ok(RuleOutcome::new(score, issues))
    }
}
