//! The per-issue execution pipeline.
//!
//! Takes a planned issue from label to final label: worktree, plan session,
//! optional TDD session, implement session, quality gate with bounded
//! in-session retries, code review, acceptance review, advisory challenger,
//! merge-ready diff, and cleanup. The cleanup tail always runs; every
//! outcome leaves a huddle comment, a sprint-log entry, and a final
//! `status:` label behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sprint_agent_client::SessionControl;
use sprint_events::{EventBus, SprintEvent};
use sprint_forge::ForgeApi;
use sprint_git_tooling::Worktrees;
use sprint_protocol::config::PhaseConfig;
use sprint_protocol::wire::SessionMode;
use sprint_protocol::{
    AgentRole, CheckCategory, CodeReviewResult, HuddleEntry, IssueResult, IssueStatus,
    QualityCheck, QualityResult, SprintConfig, SprintIssue, ZeroChangeDiagnostic, labels,
};
use sprint_quality::run_quality_gate;

use crate::SprintError;
use crate::agent_api::AgentSessions;
use crate::prompt::{TemplateStore, extract_json, sanitize};
use crate::sprint_log::{append_entry, render_huddle};

/// How many trailing output lines to keep for zero-change diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 50;

/// Everything an executor run needs; shared across issues of one sprint.
pub struct ExecutorDeps {
    pub config: SprintConfig,
    pub agent: Arc<dyn AgentSessions>,
    pub forge: Arc<dyn ForgeApi>,
    pub worktrees: Worktrees,
    pub bus: EventBus,
    pub control: SessionControl,
    pub templates: Arc<TemplateStore>,
    pub project_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    /// Sprint log markdown file, appended after every issue.
    pub log_path: PathBuf,
}

/// Working state threaded from the pipeline into cleanup.
#[derive(Default)]
struct Scratch {
    developer_session: Option<String>,
    expected_files: Vec<String>,
    quality: Option<QualityResult>,
    code_review: Option<CodeReviewResult>,
    timed_out: bool,
    stopped: bool,
    last_output_lines: Vec<String>,
    error_message: Option<String>,
}

pub struct IssueExecutor {
    deps: Arc<ExecutorDeps>,
}

impl IssueExecutor {
    pub fn new(deps: Arc<ExecutorDeps>) -> Self {
        Self { deps }
    }

    fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.deps.config.session_timeout_ms)
    }

    fn progress(&self, issue_number: u32, step: &str) {
        self.deps.bus.emit(SprintEvent::IssueProgress {
            issue_number,
            step: step.to_string(),
        });
    }

    /// Post a comment; forge side-effect failures are warnings, not fatal.
    async fn comment(&self, issue_number: u32, body: &str) {
        if let Err(err) = self.deps.forge.add_comment(issue_number as u64, body).await {
            tracing::warn!(issue = issue_number, "failed to post comment: {err}");
        }
    }

    async fn set_label(&self, issue_number: u32, label: &str) {
        if let Err(err) = self.deps.forge.set_label(issue_number as u64, label).await {
            tracing::warn!(issue = issue_number, label, "failed to set label: {err}");
        }
    }

    /// Run one issue end to end. Never returns an error: failures become a
    /// failed [`IssueResult`] after the cleanup tail has run.
    pub async fn execute(&self, issue: &SprintIssue) -> IssueResult {
        let deps = &self.deps;
        let started = std::time::Instant::now();
        let branch = deps.config.branch_name(issue.number);
        let worktree = deps.config.worktree_path(issue.number);

        deps.bus.emit(SprintEvent::IssueStart {
            issue: issue.clone(),
            model: deps.config.phase(AgentRole::Developer).model,
        });

        let mut scratch = Scratch {
            expected_files: issue.expected_files.clone(),
            ..Default::default()
        };

        if let Err(err) = self
            .run_pipeline(issue, &branch, &worktree, &mut scratch)
            .await
        {
            if err.is_timeout() {
                scratch.timed_out = true;
            }
            tracing::error!(issue = issue.number, "issue pipeline failed: {err}");
            scratch.error_message = Some(err.to_string());
        }

        self.cleanup(issue, &branch, &worktree, scratch, started.elapsed())
            .await
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        scratch: &mut Scratch,
    ) -> Result<(), SprintError> {
        let deps = &self.deps;

        self.set_label(issue.number, labels::STATUS_IN_PROGRESS).await;
        self.progress(issue.number, "creating worktree");
        deps.worktrees
            .create(worktree, branch, &deps.config.base_branch)
            .await?;

        self.progress(issue.number, "planning");
        let plan = match self.plan_phase(issue, branch, worktree, scratch).await {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(
                    issue = issue.number,
                    "plan phase failed; continuing with empty plan: {err}"
                );
                None
            }
        };

        if deps.config.flags.tdd
            && let Some(plan_text) = &plan
        {
            self.progress(issue.number, "writing tests first");
            if let Err(err) = self.tdd_phase(issue, branch, worktree, plan_text).await {
                tracing::warn!(issue = issue.number, "tdd phase failed: {err}");
            }
        }

        self.progress(issue.number, "implementing");
        self.implement_phase(issue, branch, worktree, plan.as_deref(), scratch)
            .await?;
        if scratch.stopped {
            return Err(SprintError::Stopped);
        }

        self.progress(issue.number, "quality gate");
        let mut quality = self.run_gate(branch, worktree, scratch).await?;
        self.comment(issue.number, &quality_comment(&quality)).await;

        if !quality.passed {
            let session = scratch
                .developer_session
                .clone()
                .ok_or_else(|| SprintError::Setup("no developer session for retry".into()))?;
            for attempt in 1..=deps.config.max_retries {
                self.progress(issue.number, &format!("quality retry {attempt}"));
                let feedback = quality_feedback_prompt(&quality);
                deps.agent
                    .prompt(&session, &feedback, self.session_timeout())
                    .await?;
                quality = self.run_gate(branch, worktree, scratch).await?;
                if quality.passed {
                    break;
                }
            }
            self.comment(issue.number, &quality_comment(&quality)).await;
        }

        if quality.passed {
            self.progress(issue.number, "code review");
            quality = self
                .code_review_round(issue, branch, worktree, quality, scratch)
                .await?;
        }

        if quality.passed && !issue.acceptance_criteria.trim().is_empty() {
            self.progress(issue.number, "acceptance review");
            quality = self
                .acceptance_round(issue, branch, worktree, quality, scratch)
                .await?;
        }

        if deps.config.flags.challenger && quality.passed {
            self.progress(issue.number, "challenger review");
            if let Err(err) = self.challenger_phase(issue, branch, worktree).await {
                tracing::warn!(issue = issue.number, "challenger phase failed: {err}");
            }
        }

        scratch.quality = Some(quality);
        Ok(())
    }

    /// Planner session in plan mode. Returns the plan text; structured
    /// responses also merge their `steps[].file` hints into the expected
    /// file set.
    async fn plan_phase(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        scratch: &mut Scratch,
    ) -> Result<Option<String>, SprintError> {
        let deps = &self.deps;
        let phase = deps.config.phase(AgentRole::Planner);
        let session = deps
            .agent
            .open_session(
                AgentRole::Planner,
                worktree,
                phase.mcp_servers.clone(),
                Some(issue.number),
            )
            .await?;

        let result = self
            .plan_phase_in(&session, issue, branch, worktree, &phase, scratch)
            .await;
        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close planner session: {err}");
        }
        result
    }

    async fn plan_phase_in(
        &self,
        session: &str,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        phase: &PhaseConfig,
        scratch: &mut Scratch,
    ) -> Result<Option<String>, SprintError> {
        let deps = &self.deps;
        deps.agent.set_mode(session, SessionMode::Plan).await?;
        if let Some(model) = &phase.model {
            deps.agent.set_model(session, model).await?;
        }

        let vars = self.issue_vars(issue, branch, worktree);
        let rendered = self.render_with_instructions("planner", phase, &vars)?;
        let outcome = deps
            .agent
            .prompt(session, &rendered, self.session_timeout())
            .await?;

        let plan_text = match extract_json(&outcome.response) {
            Ok(value) => {
                if let Some(steps) = value.get("steps").and_then(|s| s.as_array()) {
                    for step in steps {
                        if let Some(file) = step.get("file").and_then(|f| f.as_str())
                            && !scratch.expected_files.iter().any(|f| f == file)
                        {
                            scratch.expected_files.push(file.to_string());
                        }
                    }
                }
                value
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| outcome.response.clone())
            }
            Err(_) => outcome.response.clone(),
        };

        self.comment(
            issue.number,
            &format!("## Implementation Plan\n\n{plan_text}"),
        )
        .await;
        Ok(Some(plan_text))
    }

    /// Test-engineer session writes failing tests against the plan.
    async fn tdd_phase(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        plan: &str,
    ) -> Result<(), SprintError> {
        let deps = &self.deps;
        let phase = deps.config.phase(AgentRole::TestEngineer);
        let session = deps
            .agent
            .open_session(
                AgentRole::TestEngineer,
                worktree,
                phase.mcp_servers.clone(),
                Some(issue.number),
            )
            .await?;

        let result = async {
            deps.agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }
            let mut vars = self.issue_vars(issue, branch, worktree);
            vars.push(("IMPLEMENTATION_PLAN".into(), plan.to_string()));
            let rendered = self.render_with_instructions("tdd", &phase, &vars)?;
            deps.agent
                .prompt(&session, &rendered, self.session_timeout())
                .await?;
            Ok::<(), SprintError>(())
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close tdd session: {err}");
        }
        result?;

        self.comment(
            issue.number,
            "TDD phase: failing tests written ahead of implementation.",
        )
        .await;
        Ok(())
    }

    /// Developer session: the long-lived session reused by retries. After
    /// the first prompt returns, queued operator messages are drained into
    /// the same session; a stop request short-circuits to cleanup.
    async fn implement_phase(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        plan: Option<&str>,
        scratch: &mut Scratch,
    ) -> Result<(), SprintError> {
        let deps = &self.deps;
        let phase = deps.config.phase(AgentRole::Developer);
        let session = deps
            .agent
            .open_session(
                AgentRole::Developer,
                worktree,
                phase.mcp_servers.clone(),
                Some(issue.number),
            )
            .await?;
        scratch.developer_session = Some(session.clone());

        deps.agent.set_mode(&session, SessionMode::Agent).await?;
        if let Some(model) = &phase.model {
            deps.agent.set_model(&session, model).await?;
        }

        let vars = self.issue_vars(issue, branch, worktree);
        let mut prompt_text = self.render_with_instructions("worker", &phase, &vars)?;
        if let Some(plan) = plan {
            prompt_text.push_str("\n\n## Implementation Plan (follow this)\n\n");
            prompt_text.push_str(plan);
        }

        let result = deps
            .agent
            .prompt(&session, &prompt_text, self.session_timeout())
            .await;
        // Capture output before propagating: diagnostics want the tail even
        // (especially) when the prompt failed or timed out.
        scratch.last_output_lines = deps.agent.output_tail(&session, DIAGNOSTIC_TAIL_LINES);
        result?;

        loop {
            if deps.control.should_stop(&session) {
                deps.bus.emit(SprintEvent::WorkerOutput {
                    session_id: session.clone(),
                    text: "\n--- Session stopped by user ---\n".to_string(),
                });
                scratch.stopped = true;
                break;
            }
            let pending = deps.control.drain(&session);
            if pending.is_empty() {
                break;
            }
            for message in pending {
                deps.bus.emit(SprintEvent::WorkerOutput {
                    session_id: session.clone(),
                    text: format!("\n--- operator message ({}) ---\n", message.kind),
                });
                deps.agent
                    .prompt(&session, &message.content, self.session_timeout())
                    .await?;
            }
        }

        scratch.last_output_lines = deps.agent.output_tail(&session, DIAGNOSTIC_TAIL_LINES);
        Ok(())
    }

    async fn run_gate(
        &self,
        branch: &str,
        worktree: &Path,
        scratch: &mut Scratch,
    ) -> Result<QualityResult, SprintError> {
        let deps = &self.deps;
        let mut gate_config = deps.config.quality.clone();
        if !scratch.expected_files.is_empty() {
            gate_config.expected_files = Some(scratch.expected_files.clone());
        }
        let quality = run_quality_gate(
            &gate_config,
            worktree,
            branch,
            &deps.config.base_branch,
            &deps.worktrees,
        )
        .await?;
        scratch.quality = Some(quality.clone());
        Ok(quality)
    }

    /// One code-review pass plus at most one fix attempt.
    async fn code_review_round(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        mut quality: QualityResult,
        scratch: &mut Scratch,
    ) -> Result<QualityResult, SprintError> {
        let deps = &self.deps;
        let review = match self.review_session(issue, branch, worktree, "code-review").await {
            Ok(review) => review,
            Err(err) => {
                tracing::warn!(issue = issue.number, "code review failed: {err}");
                return Ok(quality);
            }
        };

        if review.approved {
            scratch.code_review = Some(review);
            return Ok(quality);
        }

        // One fix attempt in the developer session, then one re-review.
        let Some(session) = scratch.developer_session.clone() else {
            scratch.code_review = Some(review);
            return Ok(quality);
        };
        deps.agent
            .prompt(&session, &review_fix_prompt(&review), self.session_timeout())
            .await?;
        quality = self.run_gate(branch, worktree, scratch).await?;

        if quality.passed {
            match self.review_session(issue, branch, worktree, "code-review").await {
                Ok(second) => scratch.code_review = Some(second),
                Err(err) => {
                    tracing::warn!(issue = issue.number, "re-review failed: {err}");
                    scratch.code_review = Some(review);
                }
            }
        } else {
            scratch.code_review = Some(review);
        }
        Ok(quality)
    }

    /// Acceptance-criteria review: single pass-through fix, no second
    /// review afterwards.
    async fn acceptance_round(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        mut quality: QualityResult,
        scratch: &mut Scratch,
    ) -> Result<QualityResult, SprintError> {
        let deps = &self.deps;
        let verdict = match self
            .review_session(issue, branch, worktree, "acceptance-review")
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(issue = issue.number, "acceptance review failed: {err}");
                return Ok(quality);
            }
        };

        if !verdict.approved
            && let Some(session) = scratch.developer_session.clone()
        {
            deps.agent
                .prompt(
                    &session,
                    &acceptance_fix_prompt(&verdict),
                    self.session_timeout(),
                )
                .await?;
            quality = self.run_gate(branch, worktree, scratch).await?;
        }
        Ok(quality)
    }

    /// Fresh reviewer session over the branch diff; returns the parsed
    /// verdict (tolerant, falls back to unstructured approval detection).
    async fn review_session(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        template: &str,
    ) -> Result<CodeReviewResult, SprintError> {
        let deps = &self.deps;
        let phase = deps.config.phase(AgentRole::QualityReviewer);
        let session = deps
            .agent
            .open_session(
                AgentRole::QualityReviewer,
                worktree,
                phase.mcp_servers.clone(),
                Some(issue.number),
            )
            .await?;

        let result = async {
            deps.agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }
            let diff = deps
                .worktrees
                .diff_text(branch, &deps.config.base_branch)
                .await?;
            let mut vars = self.issue_vars(issue, branch, worktree);
            vars.push(("DIFF".into(), sanitize(&diff)));
            let rendered = self.render_with_instructions(template, &phase, &vars)?;
            let outcome = deps
                .agent
                .prompt(&session, &rendered, self.session_timeout())
                .await?;
            Ok::<String, SprintError>(outcome.response)
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close reviewer session: {err}");
        }
        Ok(parse_review(&result?))
    }

    /// Advisory challenger: posts a comment, never blocks.
    async fn challenger_phase(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
    ) -> Result<(), SprintError> {
        let deps = &self.deps;
        let phase = deps.config.phase(AgentRole::Challenger);
        let session = deps
            .agent
            .open_session(
                AgentRole::Challenger,
                worktree,
                phase.mcp_servers.clone(),
                Some(issue.number),
            )
            .await?;

        let result = async {
            deps.agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }
            let diff = deps
                .worktrees
                .diff_text(branch, &deps.config.base_branch)
                .await?;
            let mut vars = self.issue_vars(issue, branch, worktree);
            vars.push(("DIFF".into(), sanitize(&diff)));
            let rendered = self.render_with_instructions("challenger", &phase, &vars)?;
            let outcome = deps
                .agent
                .prompt(&session, &rendered, self.session_timeout())
                .await?;
            Ok::<String, SprintError>(outcome.response)
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close challenger session: {err}");
        }
        let response = result?;
        self.comment(
            issue.number,
            &format!("## Challenger Review (advisory)\n\n{response}"),
        )
        .await;
        Ok(())
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    /// The always-run tail: close the developer session, remove the
    /// worktree (warn on failure), enrich with PR stats, post the huddle,
    /// append the sprint log, and set the final label.
    async fn cleanup(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
        mut scratch: Scratch,
        elapsed: Duration,
    ) -> IssueResult {
        let deps = &self.deps;

        if let Some(session) = &scratch.developer_session {
            if let Err(err) = deps.agent.close_session(session).await {
                tracing::debug!("failed to close developer session: {err}");
            }
            deps.control.cleanup(session);
        }

        let files_changed = match deps
            .worktrees
            .changed_files(branch, &deps.config.base_branch)
            .await
        {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(issue = issue.number, "failed to gather final diff: {err}");
                Vec::new()
            }
        };

        let quality = scratch.quality.take().unwrap_or_else(|| {
            QualityResult::from_checks(vec![QualityCheck::fail(
                "pipeline",
                CheckCategory::Other,
                scratch
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "pipeline did not reach the quality gate".into()),
            )])
        });
        let (quality, status) =
            finalize_result(quality, &files_changed, scratch.error_message.is_some());

        let cleanup_warning = match deps.worktrees.remove(worktree).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(issue = issue.number, "worktree removal failed: {err}");
                Some(err.to_string())
            }
        };

        let pr_stats = match deps.forge.pr_stats(branch).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(issue = issue.number, "failed to fetch PR stats: {err}");
                None
            }
        };

        let zero_change_diagnostic = if files_changed.is_empty() && !quality.passed {
            Some(ZeroChangeDiagnostic::classify(
                std::mem::take(&mut scratch.last_output_lines),
                scratch.timed_out,
            ))
        } else {
            None
        };

        let retry_count = if quality.passed {
            0
        } else {
            deps.config.max_retries
        };
        let duration_ms = elapsed.as_millis() as u64;

        let entry = HuddleEntry {
            issue_number: issue.number,
            issue_title: issue.title.clone(),
            status,
            quality: quality.clone(),
            code_review: scratch.code_review.clone(),
            duration_ms,
            files_changed: files_changed.clone(),
            timestamp: Utc::now(),
            cleanup_warning,
            error_message: scratch.error_message.clone(),
            pr_stats,
            retry_count,
            zero_change_diagnostic,
        };

        let markdown = render_huddle(&entry);
        self.comment(issue.number, &markdown).await;
        if let Err(err) = append_entry(&deps.log_path, &markdown) {
            tracing::warn!("failed to append sprint log: {err}");
        }

        if status == IssueStatus::Completed {
            self.set_label(issue.number, labels::STATUS_DONE).await;
            deps.bus.emit(SprintEvent::IssueDone {
                issue_number: issue.number,
                duration_ms,
            });
        } else {
            self.set_label(issue.number, labels::STATUS_BLOCKED).await;
            let reason = block_reason(&quality, scratch.error_message.as_deref());
            self.comment(issue.number, &reason).await;
            deps.bus.emit(SprintEvent::IssueFail {
                issue_number: issue.number,
                reason,
            });
        }

        IssueResult {
            issue_number: issue.number,
            status,
            quality_gate_passed: quality.passed,
            quality,
            code_review: scratch.code_review,
            branch: branch.to_string(),
            duration_ms,
            files_changed,
            retry_count,
            points: issue.story_points,
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn issue_vars(
        &self,
        issue: &SprintIssue,
        branch: &str,
        worktree: &Path,
    ) -> Vec<(String, String)> {
        let deps = &self.deps;
        vec![
            ("PROJECT_NAME".into(), deps.project_name.clone()),
            ("REPO_OWNER".into(), deps.repo_owner.clone()),
            ("REPO_NAME".into(), deps.repo_name.clone()),
            (
                "SPRINT_NUMBER".into(),
                deps.config.sprint_number.to_string(),
            ),
            ("ISSUE_NUMBER".into(), issue.number.to_string()),
            ("ISSUE_TITLE".into(), sanitize(&issue.title)),
            ("ISSUE_BODY".into(), sanitize(&issue.acceptance_criteria)),
            (
                "ACCEPTANCE_CRITERIA".into(),
                sanitize(&issue.acceptance_criteria),
            ),
            ("BRANCH_NAME".into(), branch.to_string()),
            ("BASE_BRANCH".into(), deps.config.base_branch.clone()),
            ("WORKTREE_PATH".into(), worktree.display().to_string()),
            (
                "MAX_DIFF_LINES".into(),
                deps.config.quality.max_diff_lines.to_string(),
            ),
        ]
    }

    /// Render a template and prepend the phase's instruction files.
    fn render_with_instructions(
        &self,
        template: &str,
        phase: &PhaseConfig,
        vars: &[(String, String)],
    ) -> Result<String, SprintError> {
        let refs: Vec<(&str, &str)> = vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let rendered = self.deps.templates.render(template, &refs)?;

        let mut sections = Vec::new();
        for file in &phase.instruction_files {
            match std::fs::read_to_string(file) {
                Ok(contents) => sections.push(contents),
                Err(err) => {
                    tracing::warn!("skipping unreadable instruction file {}: {err}", file.display());
                }
            }
        }
        sections.push(rendered);
        Ok(sections.join("\n\n"))
    }
}

/// Downgrade a passing gate when the branch has no changes (a synthetic
/// failing `files-changed` check), and settle the final status.
fn finalize_result(
    mut quality: QualityResult,
    files_changed: &[String],
    had_error: bool,
) -> (QualityResult, IssueStatus) {
    if quality.passed && files_changed.is_empty() {
        quality.push(QualityCheck::fail(
            "files-changed",
            CheckCategory::Diff,
            "quality gate passed but the branch has no changes",
        ));
    }
    let status = if quality.passed && !had_error {
        IssueStatus::Completed
    } else {
        IssueStatus::Failed
    };
    (quality, status)
}

fn quality_comment(quality: &QualityResult) -> String {
    let mut out = String::from("## Quality Gate\n\n");
    out.push_str(if quality.passed {
        "**Result: passed**\n\n"
    } else {
        "**Result: failed**\n\n"
    });
    for check in &quality.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        if check.detail.is_empty() {
            out.push_str(&format!("- {mark} {}\n", check.name));
        } else {
            out.push_str(&format!("- {mark} {}: {}\n", check.name, check.detail));
        }
    }
    out
}

/// Feedback sent into the developer session on a gate failure.
fn quality_feedback_prompt(quality: &QualityResult) -> String {
    let mut out = String::from(
        "The quality gate failed. Fix the following and commit the changes:\n\n",
    );
    for check in quality.failing() {
        out.push_str(&format!("- {} ({:?}): {}\n", check.name, check.category, check.detail));
    }
    out.push_str("\nDo not change anything unrelated to these failures.");
    out
}

fn review_fix_prompt(review: &CodeReviewResult) -> String {
    let mut out = String::from("Code review requested changes:\n\n");
    if !review.feedback.trim().is_empty() {
        out.push_str(&format!("{}\n\n", review.feedback.trim()));
    }
    for concern in &review.issues {
        out.push_str(&format!("- {concern}\n"));
    }
    out.push_str("\nAddress the blocking concerns and commit the fixes.");
    out
}

fn acceptance_fix_prompt(verdict: &CodeReviewResult) -> String {
    let mut out =
        String::from("The acceptance-criteria review found unmet criteria:\n\n");
    if !verdict.feedback.trim().is_empty() {
        out.push_str(&format!("{}\n\n", verdict.feedback.trim()));
    }
    for concern in &verdict.issues {
        out.push_str(&format!("- {concern}\n"));
    }
    out.push_str("\nMake the criteria pass and commit the fixes.");
    out
}

/// A `**Block reason:**` comment enumerating failing checks or the error.
fn block_reason(quality: &QualityResult, error_message: Option<&str>) -> String {
    let mut out = String::from("**Block reason:**\n\n");
    let failing: Vec<_> = quality.failing().collect();
    if let Some(error) = error_message {
        out.push_str(&format!("- {error}\n"));
    }
    for check in failing {
        out.push_str(&format!("- {}: {}\n", check.name, check.detail));
    }
    out
}

/// Tolerant review parsing: structured JSON first, verdict-line fallback.
fn parse_review(response: &str) -> CodeReviewResult {
    if let Ok(value) = extract_json(response) {
        let approved = value
            .get("approved")
            .and_then(serde_json::Value::as_bool);
        if let Some(approved) = approved {
            let feedback = value
                .get("feedback")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let issues = value
                .get("issues")
                .and_then(serde_json::Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| match item {
                            serde_json::Value::String(s) => Some(s.clone()),
                            other => other
                                .get("concern")
                                .and_then(serde_json::Value::as_str)
                                .map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();
            return CodeReviewResult {
                approved,
                feedback,
                issues,
            };
        }
    }

    // Unstructured fallback: look for a verdict word.
    let upper = response.to_uppercase();
    let approved = upper.contains("APPROVED")
        && !upper.contains("NOT APPROVED")
        && !upper.contains("CHANGES REQUESTED");
    CodeReviewResult {
        approved,
        feedback: response.trim().to_string(),
        issues: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn passing_quality() -> QualityResult {
        QualityResult::from_checks(vec![QualityCheck::pass("tests", CheckCategory::Test)])
    }

    #[test]
    fn finalize_downgrades_empty_diff() {
        let (quality, status) = finalize_result(passing_quality(), &[], false);
        assert_eq!(status, IssueStatus::Failed);
        assert!(!quality.passed);
        let synthetic = quality
            .checks
            .iter()
            .find(|c| c.name == "files-changed")
            .unwrap();
        assert!(!synthetic.passed);
    }

    #[test]
    fn finalize_keeps_passing_result_with_changes() {
        let files = vec!["src/x.rs".to_string()];
        let (quality, status) = finalize_result(passing_quality(), &files, false);
        assert_eq!(status, IssueStatus::Completed);
        assert!(quality.passed);
    }

    #[test]
    fn finalize_fails_on_pipeline_error_even_with_changes() {
        let files = vec!["src/x.rs".to_string()];
        let (_, status) = finalize_result(passing_quality(), &files, true);
        assert_eq!(status, IssueStatus::Failed);
    }

    #[test]
    fn feedback_prompt_enumerates_failing_checks() {
        let quality = QualityResult::from_checks(vec![
            QualityCheck::pass("lint", CheckCategory::Lint),
            QualityCheck::fail("tests", CheckCategory::Test, "2 assertions failed"),
        ]);
        let prompt = quality_feedback_prompt(&quality);
        assert!(prompt.contains("tests"));
        assert!(prompt.contains("2 assertions failed"));
        assert!(!prompt.contains("- lint"));
    }

    #[test]
    fn block_reason_lists_error_and_checks() {
        let quality = QualityResult::from_checks(vec![QualityCheck::fail(
            "types",
            CheckCategory::Types,
            "missing symbol",
        )]);
        let reason = block_reason(&quality, Some("prompt deadline elapsed"));
        assert!(reason.starts_with("**Block reason:**"));
        assert!(reason.contains("prompt deadline elapsed"));
        assert!(reason.contains("types: missing symbol"));
    }

    #[test]
    fn parse_review_reads_structured_json() {
        let response = r#"Verdict below.
```json
{"approved": false, "feedback": "needs tests", "issues": ["no tests", {"concern": "unsafe unwrap"}]}
```"#;
        let review = parse_review(response);
        assert!(!review.approved);
        assert_eq!(review.feedback, "needs tests");
        assert_eq!(review.issues, vec!["no tests", "unsafe unwrap"]);
    }

    #[test]
    fn parse_review_falls_back_to_verdict_words() {
        let review = parse_review("APPROVED — looks solid.");
        assert!(review.approved);

        let review = parse_review("NOT APPROVED: split this function.");
        assert!(!review.approved);
        assert!(review.feedback.contains("split this function"));
    }
}
