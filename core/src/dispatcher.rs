//! The parallel dispatcher: runs the executor over dependency-ordered
//! groups under the concurrency cap, then handles merges.
//!
//! Ordering guarantee: issues within a group interleave freely, but no
//! issue in group k+1 starts before every issue in group k has settled.

use std::collections::HashMap;
use std::sync::Arc;

use sprint_events::{EventBus, SprintEvent};
use sprint_forge::MergeOptions;
use sprint_protocol::{
    CheckCategory, IssueResult, IssueStatus, QualityCheck, QualityResult, SprintPlan, labels,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::SprintError;
use crate::escalation::{Escalation, EscalationLevel};
use crate::executor::{ExecutorDeps, IssueExecutor};
use crate::grouper::{group_issues, validate_dependencies};

/// Result of one execute phase.
pub struct DispatchOutcome {
    pub result: sprint_protocol::SprintResult,
    /// True when an all-fail group stopped the sprint early.
    pub aborted: bool,
}

pub struct Dispatcher {
    deps: Arc<ExecutorDeps>,
    escalation: Arc<dyn Escalation>,
}

impl Dispatcher {
    pub fn new(deps: Arc<ExecutorDeps>, escalation: Arc<dyn Escalation>) -> Self {
        Self { deps, escalation }
    }

    fn bus(&self) -> &EventBus {
        &self.deps.bus
    }

    /// Run the plan. `prior` carries results from an interrupted run;
    /// issues already completed there are not executed again.
    pub async fn run(
        &self,
        plan: &SprintPlan,
        prior: &[IssueResult],
    ) -> Result<DispatchOutcome, SprintError> {
        for warning in validate_dependencies(&plan.issues) {
            tracing::warn!("{warning}");
        }
        let groups = group_issues(&plan.issues)?;
        let group_count = groups.len().max(1);

        let completed_before: HashMap<u32, IssueResult> = prior
            .iter()
            .filter(|r| r.status == IssueStatus::Completed)
            .map(|r| (r.issue_number, r.clone()))
            .collect();

        let mut results: Vec<IssueResult> = Vec::new();
        let mut merge_conflicts = 0u32;
        let mut aborted = false;

        for group in &groups {
            let mut group_results = self
                .run_group(plan, &group.issues, &completed_before)
                .await;

            if self.deps.config.flags.auto_merge {
                merge_conflicts += self.merge_group(&mut group_results).await;
            }

            let all_failed = !group_results.is_empty()
                && group_results
                    .iter()
                    .all(|r| r.status == IssueStatus::Failed);

            results.extend(group_results);

            if all_failed {
                let message = format!(
                    "all {} issue(s) in execution group {} failed; stopping sprint {}",
                    group.issues.len(),
                    group.group,
                    plan.sprint_number
                );
                self.escalation
                    .escalate(EscalationLevel::Must, &message)
                    .await;
                self.bus().emit(SprintEvent::SprintError {
                    error: message,
                });
                aborted = true;
                break;
            }
        }

        let durations: Vec<u64> = results.iter().map(|r| r.duration_ms).collect();
        let avg_worktree_lifetime_ms = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        let result = sprint_protocol::SprintResult {
            parallelization_ratio: plan.issues.len() as f64 / group_count as f64,
            avg_worktree_lifetime_ms,
            merge_conflicts,
            sprint_number: plan.sprint_number,
            issues: results,
        };

        Ok(DispatchOutcome { result, aborted })
    }

    /// Execute one group under the semaphore; a panicked or lost executor
    /// task is converted into a failed result so aggregates stay
    /// consistent.
    async fn run_group(
        &self,
        plan: &SprintPlan,
        numbers: &[u32],
        completed_before: &HashMap<u32, IssueResult>,
    ) -> Vec<IssueResult> {
        let semaphore = Arc::new(Semaphore::new(self.deps.config.max_parallel_sessions));
        let mut join: JoinSet<IssueResult> = JoinSet::new();
        let mut task_issue: HashMap<tokio::task::Id, u32> = HashMap::new();
        let mut results = Vec::new();

        for &number in numbers {
            if let Some(done) = completed_before.get(&number) {
                tracing::info!(issue = number, "already completed in a prior run; skipping");
                results.push(done.clone());
                continue;
            }
            let Some(issue) = plan.issue(number).cloned() else {
                tracing::warn!(issue = number, "grouped issue missing from plan; skipping");
                continue;
            };

            let executor = IssueExecutor::new(Arc::clone(&self.deps));
            let semaphore = Arc::clone(&semaphore);
            let handle = join.spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    tracing::error!("dispatcher semaphore closed unexpectedly");
                }
                let _permit = permit.ok();
                executor.execute(&issue).await
            });
            task_issue.insert(handle.id(), number);
        }

        while let Some(joined) = join.join_next_with_id().await {
            match joined {
                Ok((_, result)) => results.push(result),
                Err(join_err) => {
                    let number = task_issue.get(&join_err.id()).copied().unwrap_or(0);
                    tracing::error!(issue = number, "executor task failed: {join_err}");
                    results.push(self.failed_placeholder(number, &join_err.to_string()));
                }
            }
        }

        results.sort_by_key(|r| r.issue_number);
        results
    }

    fn failed_placeholder(&self, number: u32, reason: &str) -> IssueResult {
        IssueResult {
            issue_number: number,
            status: IssueStatus::Failed,
            quality_gate_passed: false,
            quality: QualityResult::from_checks(vec![QualityCheck::fail(
                "executor",
                CheckCategory::Other,
                reason,
            )]),
            code_review: None,
            branch: self.deps.config.branch_name(number),
            duration_ms: 0,
            files_changed: Vec::new(),
            retry_count: 0,
            points: 0,
        }
    }

    /// Merge every completed, gate-passing issue of a group. Returns the
    /// number of merge conflicts encountered; conflicted or refused issues
    /// are downgraded to failed and labelled blocked.
    async fn merge_group(&self, group_results: &mut [IssueResult]) -> u32 {
        let mut conflicts = 0;
        for result in group_results.iter_mut() {
            if result.status != IssueStatus::Completed || !result.quality_gate_passed {
                continue;
            }
            match self.merge_issue(result).await {
                MergeStep::Merged => {}
                MergeStep::Conflict(reason) => {
                    conflicts += 1;
                    self.block_merge(result, &reason).await;
                }
                MergeStep::Blocked(reason) => {
                    self.block_merge(result, &reason).await;
                }
            }
        }
        conflicts
    }

    async fn merge_issue(&self, result: &IssueResult) -> MergeStep {
        let deps = &self.deps;
        let base = &deps.config.base_branch;
        let branch = &result.branch;

        // Conflict probe first; a conflicted branch never reaches the PR.
        match deps.worktrees.has_conflicts(branch, base).await {
            Ok(true) => {
                return MergeStep::Conflict(format!(
                    "branch {branch} conflicts with {base}"
                ));
            }
            Ok(false) => {}
            Err(err) => {
                return MergeStep::Blocked(format!("conflict probe failed: {err}"));
            }
        }

        // Pre-merge verification: spot-check tests and typecheck on a local
        // merge in a scratch worktree, away from the user's checkout.
        match deps.worktrees.scratch_merge(branch, base).await {
            Ok(scratch) => {
                let quality = &deps.config.quality;
                for (name, command) in [
                    ("tests", &quality.test_command),
                    ("types", &quality.typecheck_command),
                ] {
                    let Some(command) = command else { continue };
                    if let Err(detail) = run_spot_check(command, scratch.path()).await {
                        return MergeStep::Blocked(format!(
                            "pre-merge {name} check failed on merged tree: {detail}"
                        ));
                    }
                }
            }
            Err(sprint_git_tooling::GitError::MergeConflict { .. }) => {
                return MergeStep::Conflict(format!(
                    "scratch merge of {branch} onto {base} conflicted"
                ));
            }
            Err(err) => {
                return MergeStep::Blocked(format!("scratch merge failed: {err}"));
            }
        }

        let options = MergeOptions {
            squash: deps.config.flags.squash_merge,
            delete_branch: deps.config.flags.delete_branch_on_merge,
        };
        match deps.forge.merge_issue_pr(branch, &options).await {
            Ok(outcome) if outcome.success => {
                tracing::info!(branch, pr = ?outcome.pr_number, "merged");
                MergeStep::Merged
            }
            Ok(outcome) => MergeStep::Conflict(
                outcome
                    .reason
                    .unwrap_or_else(|| "merge refused by forge".to_string()),
            ),
            Err(err) => MergeStep::Blocked(format!("merge request failed: {err}")),
        }
    }

    async fn block_merge(&self, result: &mut IssueResult, reason: &str) {
        tracing::warn!(issue = result.issue_number, "merge blocked: {reason}");
        result.status = IssueStatus::Failed;

        let deps = &self.deps;
        if let Err(err) = deps
            .forge
            .set_label(result.issue_number as u64, labels::STATUS_BLOCKED)
            .await
        {
            tracing::warn!("failed to set blocked label: {err}");
        }
        if let Err(err) = deps
            .forge
            .add_comment(
                result.issue_number as u64,
                &format!("**Block reason:**\n\n- {reason}\n"),
            )
            .await
        {
            tracing::warn!("failed to post merge-block comment: {err}");
        }
        self.bus().emit(SprintEvent::IssueFail {
            issue_number: result.issue_number,
            reason: reason.to_string(),
        });
    }
}

enum MergeStep {
    Merged,
    Conflict(String),
    Blocked(String),
}

/// Run one spot-check command in the scratch tree; Err carries the detail.
async fn run_spot_check(command: &str, cwd: &std::path::Path) -> Result<(), String> {
    let Some(argv) = shlex_split(command) else {
        return Err(format!("unparseable command: {command}"));
    };
    let output = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(cwd)
        .output()
        .await
        .map_err(|err| format!("failed to start: {err}"))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}

fn shlex_split(command: &str) -> Option<Vec<String>> {
    shlex::split(command).filter(|argv| !argv.is_empty())
}
