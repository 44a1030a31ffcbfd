use once_cell::sync::Lazy;
use regex::Regex;

use super::{PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::Result;

const LIMIT_MARKERS: &[&str] = &[
    "must",
    "must not",
    "do not",
    "don't",
    "never",
    "only",
    "without",
    "at most",
    "at least",
    "no more than",
    "no longer than",
    "limit",
    "within",
    "exactly",
    "maximum",
    "minimum",
    "avoid",
    "require",
    "required",
    "keep",
];

const ENVIRONMENT_MARKERS: &[&str] = &[
    "using",
    "version",
    "compatible",
    "rust",
    "python",
    "typescript",
    "javascript",
    "java",
    "sql",
    "dependencies",
    "library",
    "api",
];

const AUDIENCE_MARKERS: &[&str] = &[
    "audience",
    "tone",
    "beginner",
    "beginners",
    "expert",
    "experts",
    "formal",
    "informal",
    "concise",
    "style",
];

static NUMERIC_BOUND: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d+\s*(words?|lines?|characters?|chars?|tokens?|sentences?|paragraphs?|items?|bullets?|points?|steps?|ms|milliseconds?|seconds?|minutes?|kb|mb)\b|\d+\s*%",
    )
    .ok()
});

/// Are the limits the answer must respect written down?
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitConstraintsRule;

impl RuleModule for ExplicitConstraintsRule {
    fn dimension(&self) -> Dimension {
        Dimension::ExplicitConstraints
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 10;
        let mut issues = Vec::new();

        let limits = prompt.matched(LIMIT_MARKERS);
        score += (limits.len() as i32 * 15).min(60);

        let numeric = NUMERIC_BOUND
            .as_ref()
            .map_or(false, |re| re.is_match(prompt.raw()));
        if numeric {
            score += 20;
        }
        if prompt.count_all(ENVIRONMENT_MARKERS) > 0 {
            score += 10;
        }
        if prompt.count_all(AUDIENCE_MARKERS) > 0 {
            score += 10;
        }

        if limits.is_empty() && !numeric {
            issues.push(Issue::new(
                Severity::Critical,
                IssueCategory::MissingConstraint,
                dim,
                "No explicit constraints on length, format or approach",
                "State the limits the answer must respect, e.g. 'do not change the public API; keep the patch under 30 lines'.",
            ));
        } else if !numeric {
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::MissingConstraint,
                dim,
                "Constraints are qualitative only",
                "Add one measurable bound, e.g. 'at most 5 bullets' or 'under 200 words'.",
            ));
        }

        Ok(RuleOutcome::new(score, issues))
    }
}
