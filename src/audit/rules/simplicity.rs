use super::{quote_list, PromptText, RuleModule, RuleOutcome};
use crate::audit::issue::{Issue, IssueCategory, Severity};
use crate::audit::score::Dimension;
use crate::tokens::{CharacterEstimator, TokenCounter};
use crate::Result;

const FILLERS: &[&str] = &[
    "please",
    "kindly",
    "basically",
    "just",
    "i want you to",
    "i would like you to",
    "i need you to",
    "could you",
    "can you",
    "feel free to",
];

const EXTRA_ASKS: &[&str] = &[
    "also",
    "additionally",
    "as well as",
    "and then",
    "furthermore",
    "moreover",
    "in addition",
];

/// Short, single-ask prompts score high.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplicityRule;

impl RuleModule for SimplicityRule {
    fn dimension(&self) -> Dimension {
        Dimension::Simplicity
    }

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome> {
        let dim = self.dimension();
        let mut score: i32 = 100;
        let mut issues = Vec::new();

        let tokens = CharacterEstimator::new().count(prompt.raw());
        if tokens > 600 {
            score -= 30;
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::Verbosity,
                dim,
                format!("Prompt is about {} tokens long", tokens),
                "Cut background that does not change the answer and move reference material into a separate context block.",
            ));
        } else if tokens > 300 {
            score -= 15;
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Verbosity,
                dim,
                format!("Prompt is about {} tokens long", tokens),
                "Check whether every paragraph changes the answer; drop the ones that do not.",
            ));
        }

        let sentences = prompt.sentence_count().max(1);
        let avg = prompt.word_count() / sentences;
        if avg > 30 {
            score -= 15;
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Complexity,
                dim,
                format!("Average sentence length is {} words", avg),
                "Split long sentences so each one carries a single instruction.",
            ));
        }

        let questions = prompt.raw().matches('?').count();
        let asks = prompt.count_all(EXTRA_ASKS) + questions.saturating_sub(1);
        if asks >= 3 {
            score -= 20;
            issues.push(Issue::new(
                Severity::Warning,
                IssueCategory::Complexity,
                dim,
                format!("Prompt bundles {} additional asks onto the main task", asks),
                "Keep one primary task per prompt and send follow-ups separately.",
            ));
        }

        let fillers = prompt.matched(FILLERS);
        if !fillers.is_empty() {
            score -= (prompt.count_all(&fillers) as i32 * 5).min(20);
            issues.push(Issue::new(
                Severity::Suggestion,
                IssueCategory::Verbosity,
                dim,
                format!("Filler phrases: {}", quote_list(&fillers)),
                "Remove politeness and hedging; state the instruction directly.",
            ));
        }

        Ok(RuleOutcome::new(score, issues))
    }
}
