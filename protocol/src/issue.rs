//! Sprint issues, plans, and execution results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::quality::{CodeReviewResult, QualityResult};

/// A planned unit of work inside one sprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintIssue {
    /// Issue number, unique within the sprint.
    pub number: u32,
    pub title: String,
    /// ICE priority score assigned during refinement.
    #[serde(default)]
    pub ice_score: f64,
    /// Issue numbers this one depends on, within the same sprint.
    #[serde(default)]
    pub depends_on: BTreeSet<u32>,
    /// Free-text acceptance criteria from the issue body.
    #[serde(default)]
    pub acceptance_criteria: String,
    /// Planner hint: files the change is expected to touch.
    #[serde(default)]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub story_points: u32,
}

/// Plan validation failures.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("issue #{issue} depends on #{dep}, which is not in the plan")]
    DanglingDependency { issue: u32, dep: u32 },

    #[error("issue #{0} appears more than once in the plan")]
    DuplicateIssue(u32),

    #[error("issue #{issue} appears in {count} execution groups (expected exactly 1)")]
    GroupMembership { issue: u32, count: usize },

    #[error("group {group} runs issue #{issue} before its dependency #{dep}")]
    GroupOrder { group: usize, issue: u32, dep: u32 },
}

/// The planner's output for one sprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintPlan {
    pub sprint_number: u32,
    pub issues: Vec<SprintIssue>,
    /// Dependency-ordered execution groups of issue numbers.
    #[serde(default)]
    pub groups: Vec<Vec<u32>>,
    #[serde(default)]
    pub estimated_points: u32,
    #[serde(default)]
    pub rationale: String,
}

impl SprintPlan {
    /// Look up an issue by number.
    pub fn issue(&self, number: u32) -> Option<&SprintIssue> {
        self.issues.iter().find(|i| i.number == number)
    }

    /// Check the plan invariants: unique issue numbers, no dangling
    /// dependencies, and (when groups are present) every issue in exactly
    /// one group with groups respecting the dependency partial order.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen = BTreeSet::new();
        for issue in &self.issues {
            if !seen.insert(issue.number) {
                return Err(PlanError::DuplicateIssue(issue.number));
            }
        }

        for issue in &self.issues {
            for dep in &issue.depends_on {
                if !seen.contains(dep) {
                    return Err(PlanError::DanglingDependency {
                        issue: issue.number,
                        dep: *dep,
                    });
                }
            }
        }

        if self.groups.is_empty() {
            return Ok(());
        }

        for &number in &seen {
            let count = self
                .groups
                .iter()
                .filter(|g| g.contains(&number))
                .count();
            if count != 1 {
                return Err(PlanError::GroupMembership {
                    issue: number,
                    count,
                });
            }
        }

        // A dependency must be placed in a strictly earlier group.
        let group_of = |n: u32| self.groups.iter().position(|g| g.contains(&n));
        for issue in &self.issues {
            let Some(own) = group_of(issue.number) else {
                continue;
            };
            for dep in &issue.depends_on {
                if let Some(dep_group) = group_of(*dep)
                    && dep_group >= own
                {
                    return Err(PlanError::GroupOrder {
                        group: own,
                        issue: issue.number,
                        dep: *dep,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Terminal (or in-flight) status of one issue execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Completed,
    Failed,
    InProgress,
}

/// Outcome of running one issue through the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueResult {
    pub issue_number: u32,
    pub status: IssueStatus,
    pub quality_gate_passed: bool,
    pub quality: QualityResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_review: Option<CodeReviewResult>,
    pub branch: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub points: u32,
}

/// Aggregate outcome of the execute phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintResult {
    pub issues: Vec<IssueResult>,
    pub sprint_number: u32,
    /// Total issues divided by number of execution groups.
    pub parallelization_ratio: f64,
    /// Mean issue duration, a proxy for worktree lifetime.
    pub avg_worktree_lifetime_ms: u64,
    pub merge_conflicts: u32,
}

impl SprintResult {
    pub fn completed_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.status == IssueStatus::Completed)
            .count()
    }

    pub fn completed_points(&self) -> u32 {
        self.issues
            .iter()
            .filter(|i| i.status == IssueStatus::Completed)
            .map(|i| i.points)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u32, deps: &[u32]) -> SprintIssue {
        SprintIssue {
            number,
            title: format!("issue {number}"),
            ice_score: 0.0,
            depends_on: deps.iter().copied().collect(),
            acceptance_criteria: String::new(),
            expected_files: Vec::new(),
            story_points: 1,
        }
    }

    #[test]
    fn validate_accepts_well_formed_plan() {
        let plan = SprintPlan {
            sprint_number: 1,
            issues: vec![issue(1, &[]), issue(2, &[1]), issue(3, &[1])],
            groups: vec![vec![1], vec![2, 3]],
            estimated_points: 3,
            rationale: String::new(),
        };
        plan.validate().unwrap();
    }

    #[test]
    fn validate_rejects_dangling_dependency() {
        let plan = SprintPlan {
            sprint_number: 1,
            issues: vec![issue(1, &[99])],
            groups: vec![],
            estimated_points: 0,
            rationale: String::new(),
        };
        let err = plan.validate().unwrap_err();
        assert!(matches!(
            err,
            PlanError::DanglingDependency { issue: 1, dep: 99 }
        ));
    }

    #[test]
    fn validate_rejects_issue_in_two_groups() {
        let plan = SprintPlan {
            sprint_number: 1,
            issues: vec![issue(1, &[])],
            groups: vec![vec![1], vec![1]],
            estimated_points: 0,
            rationale: String::new(),
        };
        assert!(matches!(
            plan.validate().unwrap_err(),
            PlanError::GroupMembership { issue: 1, count: 2 }
        ));
    }

    #[test]
    fn validate_rejects_dependency_in_same_group() {
        let plan = SprintPlan {
            sprint_number: 1,
            issues: vec![issue(1, &[]), issue(2, &[1])],
            groups: vec![vec![1, 2]],
            estimated_points: 0,
            rationale: String::new(),
        };
        assert!(matches!(
            plan.validate().unwrap_err(),
            PlanError::GroupOrder { issue: 2, dep: 1, .. }
        ));
    }
}
