//! Audit issues and their fixed category taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::score::Dimension;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Suggestion,
}

impl Severity {
    /// Sort rank: critical first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Suggestion => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Suggestion => "suggestion",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    Ambiguity,
    MissingConstraint,
    ScopeCreep,
    MissingContext,
    Unverifiable,
    MissingOutputFormat,
    TimeSensitive,
    Nondeterminism,
    Verbosity,
    Complexity,
    Unstructured,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Ambiguity => "ambiguity",
            IssueCategory::MissingConstraint => "missing-constraint",
            IssueCategory::ScopeCreep => "scope-creep",
            IssueCategory::MissingContext => "missing-context",
            IssueCategory::Unverifiable => "unverifiable",
            IssueCategory::MissingOutputFormat => "missing-output-format",
            IssueCategory::TimeSensitive => "time-sensitive",
            IssueCategory::Nondeterminism => "nondeterminism",
            IssueCategory::Verbosity => "verbosity",
            IssueCategory::Complexity => "complexity",
            IssueCategory::Unstructured => "unstructured",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: IssueCategory,
    /// Dimension whose rule module raised the issue.
    pub dimension: Dimension,
    pub description: String,
    pub suggested_fix: String,
}

impl Issue {
    pub fn new(
        severity: Severity,
        category: IssueCategory,
        dimension: Dimension,
        description: impl Into<String>,
        suggested_fix: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            dimension,
            description: description.into(),
            suggested_fix: suggested_fix.into(),
        }
    }
}

/// Order issues by severity; detection order breaks ties.
pub fn sort_issues(issues: &mut [Issue]) {
    // sort_by_key is stable
    issues.sort_by_key(|i| i.severity.rank());
}
