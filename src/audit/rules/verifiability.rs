use super::{PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::Result;

const OUTPUT_MARKERS: &[&str] = &[
    "return",
    "returns",
    "output",
    "format",
    "json",
    "yaml",
    "csv",
    "table",
    "list",
    "bullet",
    "bullets",
    "markdown",
    "respond with",
    "reply with",
    "diff",
    "patch",
    "code block",
];

const CRITERIA_MARKERS: &[&str] = &[
    "should",
    "must",
    "expected",
    "expect",
    "success",
    "succeed",
    "pass",
    "passes",
    "test",
    "tests",
    "verify",
    "criteria",
    "acceptance",
    "so that",
    "ensure",
    "correct",
    "validate",
];

const EXAMPLE_MARKERS: &[&str] = &["e.g", "for example", "for instance", "example", "such as", "sample"];

/// Can the result be checked? Rewards a stated output shape, success
/// criteria and worked examples.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifiabilityRule;

impl RuleModule for VerifiabilityRule {
    fn dimension(&self) -> Dimension {
        Dimension::Verifiability
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 25;
        let mut issues = Vec::new();

        if prompt.count_all(CRITERIA_MARKERS) > 0 {
            score += 30;
        } else {
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::Unverifiable,
                dim,
                "Nothing states how a correct result can be recognised",
                "Add a success criterion, e.g. 'the failing test in tests/parser.rs must pass'.",
            ));
        }

        if prompt.count_all(OUTPUT_MARKERS) > 0 {
            score += 25;
        } else {
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::MissingOutputFormat,
                dim,
                "No output format is specified",
                "Say what the answer should look like, e.g. 'Return a unified diff and a one-line summary'.",
            ));
        }

        if prompt.has_code_block() || prompt.count_all(EXAMPLE_MARKERS) > 0 {
            score += 20;
        }

        Ok(RuleOutcome::new(score, issues))
    }
}
