use once_cell::sync::Lazy;
use regex::Regex;

use super::{PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::Result;

const ORDERING: &[&str] = &["first", "then", "next", "finally", "after that", "step"];

const SECTION_LABELS: &[&str] = &[
    "context:",
    "task:",
    "input:",
    "output:",
    "constraints:",
    "requirements:",
    "goal:",
    "steps:",
    "example:",
    "format:",
];

static LIST_OR_HEADING: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^\s*([-*•]|\d+[.)]|#{1,6})\s+\S").ok());

/// A one-line instruction this short needs no scaffolding.
const SHORT_PROMPT_WORDS: usize = 20;

/// Is the prompt laid out so its parts can be told apart?
#[derive(Debug, Default, Clone, Copy)]
pub struct LogicalStructureRule;

impl RuleModule for LogicalStructureRule {
    fn dimension(&self) -> Dimension {
        Dimension::LogicalStructure
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 40;
        let mut issues = Vec::new();

        let lower = prompt.raw().to_lowercase();
        let lines = prompt.non_empty_lines();
        let sectioned = LIST_OR_HEADING
            .as_ref()
            .map_or(false, |re| re.is_match(prompt.raw()))
            || SECTION_LABELS.iter().any(|l| lower.contains(l));

        if lines >= 2 {
            score += 20;
        }
        if sectioned {
            score += 25;
        }
        if prompt.count_all(ORDERING) > 0 {
            score += 15;
        }
        let words = prompt.word_count();
        if words <= SHORT_PROMPT_WORDS && prompt.sentence_count() <= 2 {
            score += 20;
        }

        if words > 60 && lines < 2 {
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::Unstructured,
                dim,
                format!("A {}-word prompt is written as a single block", words),
                "Break it into labelled sections such as Context, Task, Constraints and Output.",
            ));
        } else if words > 30 && !sectioned {
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Unstructured,
                dim,
                "No sections or lists separate context from the task",
                "Label the parts of the prompt, e.g. 'Context:' and 'Task:'.",
            ));
        }

        Ok(RuleOutcome::new(score, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> RuleOutcome {
        LogicalStructureRule.evaluate(&PromptText::new(text)).unwrap()
    }

    #[test]
    fn one_liner_is_acceptable() {
        let out = eval("Fix the bug");
        assert_eq!(out.score, 60);
        assert!(out.issues.is_empty());
    }

    #[test]
    fn sectioned_prompt_scores_high() {
        let out = eval(
            "Context: a CLI that parses logs.\nTask: first add a --since flag, then update the help text.\nOutput:\n- a unified diff",
        );
        assert_eq!(out.score, 100);
    }

    #[test]
    fn wall_of_text_is_flagged() {
        let text = "word ".repeat(70);
        let out = eval(&text);
        assert_eq!(out.issues[0].severity, Severity::Warning);
        assert_eq!(out.issues[0].category, IssueCategory::Unstructured);
    }
}
