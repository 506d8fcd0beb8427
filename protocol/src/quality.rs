//! Quality gate and code review result types.

use serde::{Deserialize, Serialize};

/// Category of a quality check, used for reporting and feedback prompts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Test,
    Lint,
    Types,
    Build,
    Diff,
    Other,
}

/// One check inside a quality gate run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub category: CheckCategory,
}

impl QualityCheck {
    pub fn pass(name: impl Into<String>, category: CheckCategory) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: String::new(),
            category,
        }
    }

    pub fn fail(
        name: impl Into<String>,
        category: CheckCategory,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
            category,
        }
    }
}

/// Aggregate result of a quality gate run.
///
/// Invariant: `passed` is always the conjunction of the checks' `passed`
/// flags; construct through [`QualityResult::from_checks`] to keep it true.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub passed: bool,
    pub checks: Vec<QualityCheck>,
}

impl QualityResult {
    pub fn from_checks(checks: Vec<QualityCheck>) -> Self {
        let passed = checks.iter().all(|c| c.passed);
        Self { passed, checks }
    }

    /// Empty result: vacuously passing (no checks configured).
    pub fn empty() -> Self {
        Self::from_checks(Vec::new())
    }

    /// Append a check and recompute the conjunction.
    pub fn push(&mut self, check: QualityCheck) {
        self.passed = self.passed && check.passed;
        self.checks.push(check);
    }

    /// The failing checks, for feedback prompts and block-reason comments.
    pub fn failing(&self) -> impl Iterator<Item = &QualityCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Verdict from the code-review sub-phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeReviewResult {
    pub approved: bool,
    pub feedback: String,
    /// Blocking concerns, one per line item.
    #[serde(default)]
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passed_is_conjunction_of_checks() {
        let all_pass = QualityResult::from_checks(vec![
            QualityCheck::pass("tests", CheckCategory::Test),
            QualityCheck::pass("lint", CheckCategory::Lint),
        ]);
        assert!(all_pass.passed);

        let one_fail = QualityResult::from_checks(vec![
            QualityCheck::pass("tests", CheckCategory::Test),
            QualityCheck::fail("lint", CheckCategory::Lint, "2 warnings"),
        ]);
        assert!(!one_fail.passed);
        assert_eq!(one_fail.failing().count(), 1);
    }

    #[test]
    fn push_downgrades_passed() {
        let mut result = QualityResult::from_checks(vec![QualityCheck::pass(
            "tests",
            CheckCategory::Test,
        )]);
        assert!(result.passed);
        result.push(QualityCheck::fail(
            "files-changed",
            CheckCategory::Diff,
            "no files changed",
        ));
        assert!(!result.passed);
    }

    #[test]
    fn empty_result_passes() {
        assert!(QualityResult::empty().passed);
    }
}
