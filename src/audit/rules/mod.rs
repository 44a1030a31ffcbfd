//! KERNEL rule modules, one per dimension.
//!
//! Every module is a pure function of the prompt text. Modules share the
//! read-only [`PromptText`] view of the input but never each other's output,
//! so the set grows by adding a module and nothing else.

mod constraints;
mod reproducibility;
mod scope;
mod simplicity;
mod structure;
mod verifiability;

pub use constraints::ExplicitConstraintsRule;
pub use reproducibility::ReproducibilityRule;
pub use scope::NarrowScopeRule;
pub use simplicity::SimplicityRule;
pub use structure::LogicalStructureRule;
pub use verifiability::VerifiabilityRule;

use once_cell::sync::Lazy;
use regex::Regex;

use super::issue::Issue;
use super::score::Dimension;
use super::RuleSetVersion;
use crate::Result;

/// Score and findings of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub score: u8,
    pub issues: Vec<Issue>,
}

impl RuleOutcome {
    pub(crate) fn new(score: i32, issues: Vec<Issue>) -> Self {
        Self {
            score: score.clamp(0, 100) as u8,
            issues,
        }
    }
}

pub trait RuleModule: Send + Sync {
    fn dimension(&self) -> Dimension;

    fn evaluate(&self, prompt: &PromptText<'_>) -> Result<RuleOutcome>;
}

/// The modules making up `version`, in dimension order.
pub fn rule_set(version: RuleSetVersion) -> Vec<Box<dyn RuleModule>> {
    match version {
        RuleSetVersion::V1 => vec![
            Box::new(SimplicityRule),
            Box::new(VerifiabilityRule),
            Box::new(ReproducibilityRule),
            Box::new(NarrowScopeRule),
            Box::new(ExplicitConstraintsRule),
            Box::new(LogicalStructureRule),
        ],
    }
}

static FILE_PATH: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[\w./-]+\.(rs|py|js|ts|tsx|go|java|kt|c|cc|cpp|h|hpp|rb|php|cs|swift|md|json|ya?ml|toml|sql|html|css|sh)\b",
    )
    .ok()
});

static IDENTIFIER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b\w+\(\)|\w+::\w+|`[^`]+`").ok());

fn is_match(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map_or(false, |r| r.is_match(text))
}

/// Lower-cased, tokenized view of a prompt.
#[derive(Debug, Clone)]
pub struct PromptText<'a> {
    raw: &'a str,
    words: Vec<String>,
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

impl<'a> PromptText<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            words: tokenize(raw),
        }
    }

    pub fn raw(&self) -> &str {
        self.raw
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Sentences, split on terminal punctuation and line breaks.
    pub fn sentence_count(&self) -> usize {
        self.raw
            .split(|c: char| matches!(c, '.' | '!' | '?' | '\n'))
            .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
            .count()
    }

    pub fn non_empty_lines(&self) -> usize {
        self.raw.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Whole-word occurrences of `phrase` (may span several words).
    pub fn count_phrase(&self, phrase: &str) -> usize {
        let needle = tokenize(phrase);
        if needle.is_empty() || needle.len() > self.words.len() {
            return 0;
        }
        self.words
            .windows(needle.len())
            .filter(|w| *w == needle.as_slice())
            .count()
    }

    /// The phrases of `list` that occur at least once, in list order.
    pub fn matched<'p>(&self, list: &[&'p str]) -> Vec<&'p str> {
        list.iter()
            .copied()
            .filter(|p| self.count_phrase(p) > 0)
            .collect()
    }

    /// Total occurrences of every phrase in `list`.
    pub fn count_all(&self, list: &[&str]) -> usize {
        list.iter().map(|p| self.count_phrase(p)).sum()
    }

    pub fn has_code_block(&self) -> bool {
        self.raw.contains("```")
    }

    /// Names a file, a function, a path or a quoted identifier.
    pub fn has_concrete_anchor(&self) -> bool {
        is_match(&FILE_PATH, self.raw)
            || is_match(&IDENTIFIER, self.raw)
            || self.raw.matches('"').count() >= 2
            || self.raw.chars().any(|c| c.is_ascii_digit())
    }
}

pub(crate) fn quote_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|i| format!("'{}'", i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrases_match_on_word_boundaries() {
        let p = PromptText::new("Do not touch the Allocator. Don't add deps; do NOT panic.");
        assert_eq!(p.count_phrase("do not"), 2);
        assert_eq!(p.count_phrase("don't"), 1);
        assert_eq!(p.count_phrase("all"), 0);
    }

    #[test]
    fn sentence_and_line_counts() {
        let p = PromptText::new("First line.\nSecond line! Third?\n\n");
        assert_eq!(p.sentence_count(), 3);
        assert_eq!(p.non_empty_lines(), 2);
    }

    #[test]
    fn anchors() {
        assert!(PromptText::new("Fix src/parser.rs").has_concrete_anchor());
        assert!(PromptText::new("Speed up `parse_header`").has_concrete_anchor());
        assert!(PromptText::new("Why does Vec::push allocate?").has_concrete_anchor());
        assert!(!PromptText::new("Fix the bug").has_concrete_anchor());
    }

    #[test]
    fn v1_covers_every_dimension_once() {
        let dims: Vec<Dimension> = rule_set(RuleSetVersion::V1)
            .iter()
            .map(|m| m.dimension())
            .collect();
        assert_eq!(dims, Dimension::ALL.to_vec());
    }
}
