//! The sprint runner: full-cycle state machine with persistence.
//!
//! Phases run in order (refine → plan → execute → review → retro), the
//! state file is rewritten after every transition, and pause/stop are
//! honoured between ceremonies — never inside one. A paused cycle returns;
//! `resume()` restores the recorded phase and the next `full_cycle()` call
//! picks up from there. A crash resumes the same way, and previously
//! completed issues are skipped by the dispatcher so work already on the
//! forge is not repeated.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sprint_agent_client::SessionControl;
use sprint_events::{EventBus, LogLevel, SprintEvent};
use sprint_forge::{ForgeApi, IssueFilter};
use sprint_git_tooling::Worktrees;
use sprint_protocol::wire::SessionMode;
use sprint_protocol::{AgentRole, SprintConfig, SprintPhase, SprintPlan, SprintState, labels};

use crate::SprintError;
use crate::agent_api::AgentSessions;
use crate::config::ProjectConfig;
use crate::dispatcher::Dispatcher;
use crate::escalation::Escalation;
use crate::executor::ExecutorDeps;
use crate::grouper::group_issues;
use crate::metrics::format_duration;
use crate::prompt::{TemplateStore, extract_json, sanitize};
use crate::state_store::StateStore;
use crate::velocity::{VelocityRow, upsert_velocity_row};

/// Templates every cycle needs; missing ones are a setup error surfaced
/// before any side effects.
const REQUIRED_TEMPLATES: &[&str] = &[
    "refiner",
    "sprint-planner",
    "planner",
    "worker",
    "code-review",
    "acceptance-review",
    "review",
    "retro",
];

/// Pause/stop signals shared with the dashboard collaborator.
#[derive(Clone, Default)]
pub struct RunControl {
    inner: Arc<Mutex<ControlFlags>>,
}

#[derive(Default)]
struct ControlFlags {
    pause_requested: bool,
    stop_requested: bool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pause_requested = true;
    }

    pub fn request_stop(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).stop_requested = true;
    }

    fn take(&self) -> (bool, bool) {
        let mut flags = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let taken = (flags.pause_requested, flags.stop_requested);
        flags.pause_requested = false;
        flags.stop_requested = false;
        taken
    }
}

/// External collaborators and project identity for one runner.
pub struct RunnerDeps {
    pub project_path: PathBuf,
    pub project: ProjectConfig,
    pub agent: Arc<dyn AgentSessions>,
    pub forge: Arc<dyn ForgeApi>,
    pub bus: EventBus,
    pub control: SessionControl,
    pub escalation: Arc<dyn Escalation>,
}

pub struct SprintRunner {
    deps: RunnerDeps,
    config: SprintConfig,
    templates: Arc<TemplateStore>,
    store: StateStore,
    state: Mutex<SprintState>,
    run_control: RunControl,
}

enum Step {
    Continue,
    Halt,
}

impl SprintRunner {
    /// Build a runner for one sprint, loading persisted state if present.
    pub fn new(deps: RunnerDeps, sprint_number: u32) -> Result<Self, SprintError> {
        let config = deps.project.sprint_config(sprint_number, &deps.project_path);
        let templates = Arc::new(TemplateStore::new(
            deps.project.prompts_dir(&deps.project_path),
        ));
        let store = StateStore::new(
            ProjectConfig::sprints_dir(&deps.project_path),
            config.slug.clone(),
        );
        let state = store
            .load(sprint_number)?
            .unwrap_or_else(|| SprintState::new(sprint_number));

        Ok(Self {
            deps,
            config,
            templates,
            store,
            state: Mutex::new(state),
            run_control: RunControl::new(),
        })
    }

    pub fn control(&self) -> RunControl {
        self.run_control.clone()
    }

    pub fn state(&self) -> SprintState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn config(&self) -> &SprintConfig {
        &self.config
    }

    fn persist(&self) -> Result<(), SprintError> {
        let state = self.state();
        self.store.save(&state)?;
        Ok(())
    }

    fn set_phase(&self, to: SprintPhase, agent: Option<AgentRole>) -> Result<(), SprintError> {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let from = state.phase;
            state.phase = to;
            from
        };
        self.persist()?;
        let model = agent.and_then(|role| self.config.phase(role).model);
        self.deps.bus.emit(SprintEvent::PhaseChange {
            from: from.to_string(),
            to: to.to_string(),
            agent,
            model,
        });
        Ok(())
    }

    /// Honour pause/stop between ceremonies. Never preempts a running one.
    fn checkpoint(&self) -> Result<Step, SprintError> {
        let (pause, stop) = self.run_control.take();
        if !pause && !stop {
            return Ok(Step::Continue);
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.phase_before_pause = Some(state.phase);
            state.phase = SprintPhase::Paused;
        }
        self.persist()?;
        self.deps.bus.emit(SprintEvent::SprintPaused);
        if stop {
            self.deps.bus.log(LogLevel::Error, "sprint stopped by operator");
            self.deps.bus.emit(SprintEvent::SprintError {
                error: "sprint stopped by operator".to_string(),
            });
        }
        Ok(Step::Halt)
    }

    /// Restore the pre-pause phase; the next `full_cycle` continues there.
    pub fn resume(&self) -> Result<(), SprintError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.phase != SprintPhase::Paused {
                return Ok(());
            }
            state.phase = state.phase_before_pause.take().unwrap_or(SprintPhase::Init);
        }
        self.persist()?;
        self.deps.bus.emit(SprintEvent::SprintResumed);
        Ok(())
    }

    fn verify_setup(&self) -> Result<(), SprintError> {
        let mut needed: Vec<&str> = REQUIRED_TEMPLATES.to_vec();
        if self.config.flags.tdd {
            needed.push("tdd");
        }
        if self.config.flags.challenger {
            needed.push("challenger");
        }
        for name in needed {
            let path = self.templates.dir().join(format!("{name}.md"));
            if !path.exists() {
                return Err(SprintError::Setup(format!(
                    "missing prompt template: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Run the cycle from the current phase to completion, pause, or
    /// failure. Structural errors persist `failed` before propagating.
    pub async fn full_cycle(&self) -> Result<SprintState, SprintError> {
        self.verify_setup()?;
        let cycle_started = Instant::now();

        loop {
            let phase = self.state().phase;
            let step = match phase {
                SprintPhase::Init => {
                    self.deps.bus.emit(SprintEvent::SprintStart {
                        sprint_number: self.config.sprint_number,
                    });
                    self.set_phase(SprintPhase::Refine, Some(AgentRole::Refiner))?;
                    Step::Continue
                }
                SprintPhase::Refine => self.run_ceremony(phase, cycle_started).await?,
                SprintPhase::Plan => self.run_ceremony(phase, cycle_started).await?,
                SprintPhase::Execute => self.run_ceremony(phase, cycle_started).await?,
                SprintPhase::Review => self.run_ceremony(phase, cycle_started).await?,
                SprintPhase::Retro => self.run_ceremony(phase, cycle_started).await?,
                SprintPhase::Complete | SprintPhase::Failed | SprintPhase::Paused => {
                    return Ok(self.state());
                }
            };
            if matches!(step, Step::Halt) {
                return Ok(self.state());
            }
        }
    }

    async fn run_ceremony(
        &self,
        phase: SprintPhase,
        cycle_started: Instant,
    ) -> Result<Step, SprintError> {
        if matches!(self.checkpoint()?, Step::Halt) {
            return Ok(Step::Halt);
        }

        let outcome = match phase {
            SprintPhase::Refine => self.refine().await,
            SprintPhase::Plan => self.plan().await,
            SprintPhase::Execute => self.execute().await,
            SprintPhase::Review => self.review().await,
            SprintPhase::Retro => self.retro(cycle_started).await,
            _ => Ok(()),
        };

        if let Err(err) = outcome {
            tracing::error!("{phase} ceremony failed: {err}");
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.phase = SprintPhase::Failed;
            }
            self.persist()?;
            self.deps.bus.emit(SprintEvent::SprintError {
                error: err.to_string(),
            });
            return Err(err);
        }

        match phase {
            SprintPhase::Refine => self.set_phase(SprintPhase::Plan, Some(AgentRole::Planner))?,
            SprintPhase::Plan => {
                self.set_phase(SprintPhase::Execute, Some(AgentRole::Developer))?
            }
            SprintPhase::Execute => {
                // An aborted execute phase has already moved to failed.
                if self.state().phase == SprintPhase::Failed {
                    return Ok(Step::Halt);
                }
                self.set_phase(SprintPhase::Review, Some(AgentRole::QualityReviewer))?
            }
            SprintPhase::Review => self.set_phase(SprintPhase::Retro, Some(AgentRole::Retro))?,
            SprintPhase::Retro => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.final_elapsed_ms = Some(cycle_started.elapsed().as_millis() as u64);
                }
                self.set_phase(SprintPhase::Complete, None)?;
                self.deps.bus.emit(SprintEvent::SprintComplete {
                    sprint_number: self.config.sprint_number,
                });
            }
            _ => {}
        }
        Ok(Step::Continue)
    }

    /// Run exactly one ceremony without advancing the phase machine. Used
    /// by the CLI's `plan`, `refine`, `review`, and `retro` commands.
    pub async fn run_single(&self, phase: SprintPhase) -> Result<SprintState, SprintError> {
        self.verify_setup()?;
        match phase {
            SprintPhase::Refine => self.refine().await?,
            SprintPhase::Plan => self.plan().await?,
            SprintPhase::Execute => self.execute().await?,
            SprintPhase::Review => self.review().await?,
            SprintPhase::Retro => self.retro(Instant::now()).await?,
            other => {
                return Err(SprintError::Setup(format!(
                    "{other} is not a runnable ceremony"
                )));
            }
        }
        self.persist()?;
        Ok(self.state())
    }

    // ── Ceremonies ───────────────────────────────────────────────────────

    /// Refinement: a refiner session scores and rewrites open ideas, which
    /// are then labelled `status:refined`.
    async fn refine(&self) -> Result<(), SprintError> {
        let deps = &self.deps;
        let ideas = deps
            .forge
            .list_issues(&IssueFilter {
                milestone: None,
                state: Some("open".into()),
                labels: vec![labels::TYPE_IDEA.into()],
            })
            .await?;
        if ideas.is_empty() {
            tracing::info!("no open ideas to refine");
            return Ok(());
        }

        let phase = self.config.phase(AgentRole::Refiner);
        let session = deps
            .agent
            .open_session(
                AgentRole::Refiner,
                &deps.project_path,
                phase.mcp_servers.clone(),
                None,
            )
            .await?;

        let result = async {
            deps.agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }

            for idea in ideas.iter().take(self.config.max_issues_per_sprint) {
                let vars = self.base_vars_with(vec![
                    ("ISSUE_NUMBER".into(), idea.number.to_string()),
                    ("ISSUE_TITLE".into(), sanitize(&idea.title)),
                    ("ISSUE_BODY".into(), sanitize(&idea.body)),
                ]);
                let rendered = self.render("refiner", &vars)?;
                let outcome = deps
                    .agent
                    .prompt(&session, &rendered, self.prompt_timeout())
                    .await?;

                if let Err(err) = deps
                    .forge
                    .add_comment(
                        idea.number,
                        &format!("## Refinement\n\n{}", outcome.response),
                    )
                    .await
                {
                    tracing::warn!("failed to post refinement comment: {err}");
                }
                if let Err(err) = deps
                    .forge
                    .set_label(idea.number, labels::STATUS_REFINED)
                    .await
                {
                    tracing::warn!("failed to label refined idea: {err}");
                }
            }
            Ok::<(), SprintError>(())
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close refiner session: {err}");
        }
        result
    }

    /// Planning: the planner session turns the milestone backlog into a
    /// validated, grouped sprint plan.
    async fn plan(&self) -> Result<(), SprintError> {
        let deps = &self.deps;
        let milestone = deps
            .forge
            .list_sprint_milestones(&deps.project.project.milestone_prefix)
            .await?
            .into_iter()
            .find(|m| m.sprint_number == self.config.sprint_number)
            .ok_or_else(|| {
                SprintError::Setup(format!(
                    "no milestone found for sprint {}",
                    self.config.sprint_number
                ))
            })?;

        let backlog = deps
            .forge
            .list_issues(&IssueFilter {
                milestone: Some(milestone.milestone_number),
                state: Some("open".into()),
                labels: vec![],
            })
            .await?;
        if backlog.is_empty() {
            return Err(SprintError::Setup(format!(
                "milestone '{}' has no open issues to plan",
                milestone.title
            )));
        }

        let mut backlog_md = String::new();
        for issue in &backlog {
            backlog_md.push_str(&format!(
                "- #{} {} — {}\n",
                issue.number,
                sanitize(&issue.title),
                sanitize(&issue.body).replace('\n', " ")
            ));
        }

        let phase = self.config.phase(AgentRole::Planner);
        let session = deps
            .agent
            .open_session(
                AgentRole::Planner,
                &deps.project_path,
                phase.mcp_servers.clone(),
                None,
            )
            .await?;

        let response = async {
            deps.agent.set_mode(&session, SessionMode::Plan).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }
            let vars = self.base_vars_with(vec![
                ("BACKLOG".into(), backlog_md.clone()),
                (
                    "MAX_ISSUES".into(),
                    self.config.max_issues_per_sprint.to_string(),
                ),
            ]);
            let rendered = self.render("sprint-planner", &vars)?;
            let outcome = deps
                .agent
                .prompt(&session, &rendered, self.prompt_timeout())
                .await?;
            Ok::<String, SprintError>(outcome.response)
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close planner session: {err}");
        }

        let value = extract_json(&response?).map_err(|err| {
            SprintError::Setup(format!("planner returned no parsable plan: {err}"))
        })?;
        let mut plan: SprintPlan = serde_json::from_value(serde_json::json!({
            "sprint_number": self.config.sprint_number,
            "issues": value.get("issues").cloned().unwrap_or(serde_json::json!([])),
            "groups": [],
            "estimated_points": value.get("estimated_points").cloned().unwrap_or(serde_json::json!(0)),
            "rationale": value.get("rationale").cloned().unwrap_or(serde_json::json!("")),
        }))
        .map_err(|err| SprintError::Setup(format!("planner returned invalid plan: {err}")))?;

        if plan.issues.is_empty() {
            return Err(SprintError::Setup("planner selected no issues".into()));
        }
        plan.issues.truncate(self.config.max_issues_per_sprint);
        plan.groups = group_issues(&plan.issues)?
            .into_iter()
            .map(|g| g.issues)
            .collect();
        plan.validate()?;

        self.deps.bus.emit(SprintEvent::SprintPlanned {
            issues: plan.issues.clone(),
        });
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.plan = Some(plan);
        }
        self.persist()
    }

    /// Execution: hand the plan to the dispatcher. Previously completed
    /// issues (crash resume) are skipped.
    async fn execute(&self) -> Result<(), SprintError> {
        let (plan, prior) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let plan = state
                .plan
                .clone()
                .ok_or_else(|| SprintError::Setup("execute phase reached without a plan".into()))?;
            let prior = state
                .result
                .as_ref()
                .map(|r| r.issues.clone())
                .unwrap_or_default();
            (plan, prior)
        };

        let executor_deps = Arc::new(ExecutorDeps {
            config: self.config.clone(),
            agent: Arc::clone(&self.deps.agent),
            forge: Arc::clone(&self.deps.forge),
            worktrees: Worktrees::new(&self.deps.project_path),
            bus: self.deps.bus.clone(),
            control: self.deps.control.clone(),
            templates: Arc::clone(&self.templates),
            project_name: self.deps.project.project.name.clone(),
            repo_owner: self.deps.project.project.repo_owner.clone(),
            repo_name: self.deps.project.project.repo_name.clone(),
            log_path: self
                .deps
                .project
                .log_path(&self.deps.project_path, self.config.sprint_number),
        });

        let dispatcher = Dispatcher::new(executor_deps, Arc::clone(&self.deps.escalation));
        let outcome = dispatcher.run(&plan, &prior).await?;

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.result = Some(outcome.result);
            if outcome.aborted {
                state.phase = SprintPhase::Failed;
            }
        }
        self.persist()
    }

    async fn review(&self) -> Result<(), SprintError> {
        let report = self
            .report_ceremony(AgentRole::QualityReviewer, "review")
            .await?;
        let dir = ProjectConfig::sprints_dir(&self.deps.project_path);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "{}-{}-review.md",
            self.config.slug, self.config.sprint_number
        ));
        std::fs::write(&path, &report)?;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.review = Some(report);
        }
        self.persist()
    }

    async fn retro(&self, cycle_started: Instant) -> Result<(), SprintError> {
        let report = self.report_ceremony(AgentRole::Retro, "retro").await?;
        let dir = ProjectConfig::sprints_dir(&self.deps.project_path);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "{}-{}-retro.md",
            self.config.slug, self.config.sprint_number
        ));
        std::fs::write(&path, &report)?;

        let state_snapshot = self.state();
        let planned = state_snapshot
            .plan
            .as_ref()
            .map(|p| p.issues.iter().map(|i| i.story_points).sum())
            .unwrap_or(0u32);
        let done = state_snapshot
            .result
            .as_ref()
            .map(|r| r.completed_points())
            .unwrap_or(0);
        let done_count = state_snapshot
            .result
            .as_ref()
            .map(|r| r.completed_count() as u32)
            .unwrap_or(0);
        let hours = cycle_started.elapsed().as_secs_f64() / 3600.0;
        let row = VelocityRow {
            sprint: self.config.sprint_number,
            date: state_snapshot.started_at.format("%Y-%m-%d").to_string(),
            goal: state_snapshot
                .plan
                .as_ref()
                .map(|p| p.rationale.lines().next().unwrap_or("").to_string())
                .unwrap_or_default(),
            planned,
            done,
            carry: planned.saturating_sub(done),
            hours,
            issues_per_hour: if hours > 0.0 {
                done_count as f64 / hours
            } else {
                0.0
            },
            notes: String::new(),
        };
        if let Err(err) =
            upsert_velocity_row(&ProjectConfig::velocity_path(&self.deps.project_path), &row)
        {
            tracing::warn!("failed to update velocity file: {err}");
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.retro = Some(report);
        }
        self.persist()
    }

    /// Review and retro share the same shape: one session, one report.
    async fn report_ceremony(
        &self,
        role: AgentRole,
        template: &str,
    ) -> Result<String, SprintError> {
        let deps = &self.deps;
        let results_md = self.results_summary();
        let phase = self.config.phase(role);
        let session = deps
            .agent
            .open_session(role, &deps.project_path, phase.mcp_servers.clone(), None)
            .await?;

        let result = async {
            deps.agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = &phase.model {
                deps.agent.set_model(&session, model).await?;
            }
            let vars = self.base_vars_with(vec![("SPRINT_RESULTS".into(), results_md.clone())]);
            let rendered = self.render(template, &vars)?;
            let outcome = deps
                .agent
                .prompt(&session, &rendered, self.prompt_timeout())
                .await?;
            Ok::<String, SprintError>(outcome.response)
        }
        .await;

        if let Err(err) = deps.agent.close_session(&session).await {
            tracing::debug!("failed to close {role} session: {err}");
        }
        result
    }

    fn results_summary(&self) -> String {
        let state = self.state();
        let Some(result) = &state.result else {
            return "No issues were executed.".to_string();
        };
        let mut out = String::new();
        for issue in &result.issues {
            out.push_str(&format!(
                "- #{}: {:?}, gate {}, {} file(s), {}\n",
                issue.issue_number,
                issue.status,
                if issue.quality_gate_passed { "passed" } else { "failed" },
                issue.files_changed.len(),
                format_duration(issue.duration_ms),
            ));
        }
        out.push_str(&format!(
            "\nParallelization ratio: {:.2}; merge conflicts: {}\n",
            result.parallelization_ratio, result.merge_conflicts
        ));
        out
    }

    fn prompt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.session_timeout_ms)
    }

    fn base_vars_with(&self, extra: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut vars = vec![
            (
                "PROJECT_NAME".into(),
                self.deps.project.project.name.clone(),
            ),
            (
                "REPO_OWNER".into(),
                self.deps.project.project.repo_owner.clone(),
            ),
            (
                "REPO_NAME".into(),
                self.deps.project.project.repo_name.clone(),
            ),
            (
                "SPRINT_NUMBER".into(),
                self.config.sprint_number.to_string(),
            ),
        ];
        vars.extend(extra);
        vars
    }

    fn render(&self, template: &str, vars: &[(String, String)]) -> Result<String, SprintError> {
        let refs: Vec<(&str, &str)> = vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        Ok(self.templates.render(template, &refs)?)
    }
}

/// Run sprints back to back until the forge has no open sprint milestone.
pub async fn sprint_loop(
    mut make_deps: impl FnMut() -> RunnerDeps,
) -> Result<(), SprintError> {
    let mut last_sprint: Option<u32> = None;
    loop {
        let deps = make_deps();
        let prefix = deps.project.project.milestone_prefix.clone();
        let Some(milestone) = deps.forge.next_open_milestone(&prefix).await? else {
            tracing::info!("no open sprint milestone; loop finished");
            return Ok(());
        };

        if last_sprint == Some(milestone.sprint_number) {
            tracing::warn!(
                sprint = milestone.sprint_number,
                "milestone still open after a full cycle; stopping loop to avoid spinning"
            );
            return Ok(());
        }
        last_sprint = Some(milestone.sprint_number);

        let runner = SprintRunner::new(deps, milestone.sprint_number)?;
        let state = runner.full_cycle().await?;
        if state.phase != sprint_protocol::SprintPhase::Complete {
            tracing::warn!(
                sprint = milestone.sprint_number,
                phase = %state.phase,
                "cycle ended before completion; stopping loop"
            );
            return Ok(());
        }
    }
}
