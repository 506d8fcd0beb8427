//! Shared fixtures: a scripted agent, a recording forge, and a git repo
//! with the prompt templates the pipeline needs.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sprint_agent_client::{AgentClientError, SessionControl};
use sprint_core::agent_api::AgentSessions;
use sprint_core::escalation::{Escalation, EscalationLevel};
use sprint_core::executor::ExecutorDeps;
use sprint_core::prompt::TemplateStore;
use sprint_events::EventBus;
use sprint_forge::{
    ForgeApi, ForgeError, ForgeIssue, IssueFilter, MergeOptions, MergeOutcome, NewIssue,
    SprintMilestone,
};
use sprint_git_tooling::Worktrees;
use sprint_protocol::config::{McpServerConfig, QualityGateConfig, SprintConfig};
use sprint_protocol::wire::{PromptResult, SessionMode, StopReason};
use sprint_protocol::{AgentRole, FeatureFlags, PrStats, SprintIssue};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted agent
// ─────────────────────────────────────────────────────────────────────────────

type CwdAction = Arc<dyn Fn(&Path) -> String + Send + Sync>;

/// One canned reaction to a prompt.
#[derive(Clone)]
pub enum Scripted {
    /// Respond with fixed text.
    Text(String),
    /// Fail the prompt with an agent error.
    Fail(String),
    /// Fail the prompt with a timeout.
    TimeoutErr,
    /// Run a closure with the session's cwd (e.g. write + commit files),
    /// respond with its return value.
    WithCwd(CwdAction),
}

pub fn with_cwd(action: impl Fn(&Path) -> String + Send + Sync + 'static) -> Scripted {
    Scripted::WithCwd(Arc::new(action))
}

#[derive(Default)]
struct ScriptedState {
    counter: u64,
    session_role: HashMap<String, AgentRole>,
    session_cwd: HashMap<String, PathBuf>,
    queues: HashMap<AgentRole, VecDeque<Scripted>>,
    defaults: HashMap<AgentRole, Scripted>,
    prompts: HashMap<AgentRole, Vec<String>>,
    opened: HashMap<AgentRole, u32>,
    output_lines: Vec<String>,
}

/// Deterministic stand-in for the agent client. Session ids are
/// `<role>-<n>` with a process-wide counter.
#[derive(Default)]
pub struct ScriptedAgent {
    state: Mutex<ScriptedState>,
}

impl ScriptedAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next reaction for a role (FIFO per role).
    pub fn script(&self, role: AgentRole, response: Scripted) {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(role).or_default().push_back(response);
    }

    /// Reaction used when a role's queue is empty.
    pub fn default_response(&self, role: AgentRole, response: Scripted) {
        let mut state = self.state.lock().unwrap();
        state.defaults.insert(role, response);
    }

    pub fn set_output_lines(&self, lines: Vec<String>) {
        self.state.lock().unwrap().output_lines = lines;
    }

    /// All prompt texts a role has received, in order.
    pub fn prompts_for(&self, role: AgentRole) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .prompts
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    pub fn sessions_opened(&self, role: AgentRole) -> u32 {
        self.state
            .lock()
            .unwrap()
            .opened
            .get(&role)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AgentSessions for ScriptedAgent {
    async fn open_session(
        &self,
        role: AgentRole,
        cwd: &Path,
        _mcp_servers: Vec<McpServerConfig>,
        _issue_number: Option<u32>,
    ) -> Result<String, AgentClientError> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let session_id = format!("{role}-{}", state.counter);
        state.session_role.insert(session_id.clone(), role);
        state.session_cwd.insert(session_id.clone(), cwd.to_path_buf());
        *state.opened.entry(role).or_default() += 1;
        Ok(session_id)
    }

    async fn set_mode(
        &self,
        _session_id: &str,
        _mode: SessionMode,
    ) -> Result<(), AgentClientError> {
        Ok(())
    }

    async fn set_model(&self, _session_id: &str, _model: &str) -> Result<(), AgentClientError> {
        Ok(())
    }

    async fn prompt(
        &self,
        session_id: &str,
        text: &str,
        _timeout: Duration,
    ) -> Result<PromptResult, AgentClientError> {
        let (scripted, cwd) = {
            let mut state = self.state.lock().unwrap();
            let role = *state
                .session_role
                .get(session_id)
                .unwrap_or(&AgentRole::General);
            state
                .prompts
                .entry(role)
                .or_default()
                .push(text.to_string());
            let scripted = state
                .queues
                .get_mut(&role)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.defaults.get(&role).cloned())
                .unwrap_or_else(|| {
                    Scripted::Text(r#"{"approved": true, "summary": "ok"}"#.to_string())
                });
            let cwd = state.session_cwd.get(session_id).cloned();
            (scripted, cwd)
        };

        let response = match scripted {
            Scripted::Text(text) => text,
            Scripted::Fail(message) => {
                return Err(AgentClientError::Agent { code: 1, message });
            }
            Scripted::TimeoutErr => return Err(AgentClientError::Timeout),
            Scripted::WithCwd(action) => {
                let cwd = cwd.unwrap_or_else(std::env::temp_dir);
                action(&cwd)
            }
        };
        Ok(PromptResult {
            response,
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn close_session(&self, _session_id: &str) -> Result<(), AgentClientError> {
        Ok(())
    }

    fn output_tail(&self, _session_id: &str, last_n: usize) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let skip = state.output_lines.len().saturating_sub(last_n);
        state.output_lines.iter().skip(skip).cloned().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording forge
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingForge {
    pub comments: Mutex<Vec<(u64, String)>>,
    pub labels: Mutex<Vec<(u64, String)>>,
    pub merge_calls: Mutex<Vec<String>>,
    pub merge_outcome: Mutex<Option<MergeOutcome>>,
    pub stats: Mutex<Option<PrStats>>,
    pub issues: Mutex<Vec<(ForgeIssue, Option<u64>)>>,
    pub milestones: Mutex<Vec<SprintMilestone>>,
}

impl RecordingForge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_issue(&self, issue: ForgeIssue, milestone: Option<u64>) {
        self.issues.lock().unwrap().push((issue, milestone));
    }

    pub fn add_milestone(&self, milestone: SprintMilestone) {
        self.milestones.lock().unwrap().push(milestone);
    }

    pub fn labels_for(&self, number: u64) -> Vec<String> {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, label)| label.clone())
            .collect()
    }

    pub fn comments_for(&self, number: u64) -> Vec<String> {
        self.comments
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl ForgeApi for RecordingForge {
    async fn get_issue(&self, number: u64) -> Result<ForgeIssue, ForgeError> {
        let issues = self.issues.lock().unwrap();
        issues
            .iter()
            .find(|(issue, _)| issue.number == number)
            .map(|(issue, _)| issue.clone())
            .ok_or(ForgeError::Api {
                status: 404,
                message: format!("issue {number} not found"),
            })
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<ForgeIssue>, ForgeError> {
        let issues = self.issues.lock().unwrap();
        Ok(issues
            .iter()
            .filter(|(issue, milestone)| {
                let milestone_ok = match filter.milestone {
                    Some(wanted) => *milestone == Some(wanted),
                    None => true,
                };
                let state_ok = filter
                    .state
                    .as_ref()
                    .is_none_or(|state| issue.state == *state);
                let labels_ok = filter
                    .labels
                    .iter()
                    .all(|label| issue.labels.contains(label));
                milestone_ok && state_ok && labels_ok
            })
            .map(|(issue, _)| issue.clone())
            .collect())
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<(), ForgeError> {
        self.comments
            .lock()
            .unwrap()
            .push((number, body.to_string()));
        Ok(())
    }

    async fn set_label(&self, number: u64, label: &str) -> Result<(), ForgeError> {
        self.labels
            .lock()
            .unwrap()
            .push((number, label.to_string()));
        Ok(())
    }

    async fn create_issue(&self, new: &NewIssue) -> Result<ForgeIssue, ForgeError> {
        let mut issues = self.issues.lock().unwrap();
        let number = 1000 + issues.len() as u64;
        let issue = ForgeIssue {
            number,
            title: new.title.clone(),
            body: new.body.clone(),
            labels: new.labels.clone(),
            state: "open".to_string(),
        };
        issues.push((issue.clone(), None));
        Ok(issue)
    }

    async fn list_sprint_milestones(
        &self,
        _prefix: &str,
    ) -> Result<Vec<SprintMilestone>, ForgeError> {
        Ok(self.milestones.lock().unwrap().clone())
    }

    async fn pr_stats(&self, _branch: &str) -> Result<Option<PrStats>, ForgeError> {
        Ok(*self.stats.lock().unwrap())
    }

    async fn merge_issue_pr(
        &self,
        branch: &str,
        _options: &MergeOptions,
    ) -> Result<MergeOutcome, ForgeError> {
        self.merge_calls.lock().unwrap().push(branch.to_string());
        Ok(self
            .merge_outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(MergeOutcome {
                success: true,
                pr_number: Some(1),
                reason: None,
            }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Escalation recorder
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingEscalation {
    pub calls: Mutex<Vec<(EscalationLevel, String)>>,
}

impl RecordingEscalation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Escalation for RecordingEscalation {
    async fn escalate(&self, level: EscalationLevel, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Git + template fixture
// ─────────────────────────────────────────────────────────────────────────────

pub fn git(dir: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.email", "runner@example.com"]);
    git(dir, &["config", "user.name", "Sprint Runner"]);
    std::fs::write(dir.join("README.md"), "# fixture\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "initial commit"]);
}

/// Write a file inside a worktree and commit it; usable as a
/// [`Scripted::WithCwd`] action body.
pub fn write_and_commit(cwd: &Path, name: &str, contents: &str) {
    let full = cwd.join(name);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(&full, contents).unwrap();
    git(cwd, &["add", "."]);
    git(cwd, &["commit", "-m", &format!("add {name}")]);
}

pub const TEMPLATE_NAMES: &[&str] = &[
    "refiner",
    "sprint-planner",
    "planner",
    "tdd",
    "worker",
    "code-review",
    "acceptance-review",
    "challenger",
    "review",
    "retro",
];

pub fn write_templates(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    for name in TEMPLATE_NAMES {
        std::fs::write(
            dir.join(format!("{name}.md")),
            format!("{name} for issue {{{{ISSUE_NUMBER}}}} on {{{{BRANCH_NAME}}}}\n"),
        )
        .unwrap();
    }
}

pub fn sprint_config(project: &Path, flags: FeatureFlags) -> SprintConfig {
    SprintConfig {
        sprint_number: 1,
        prefix: "sprint".into(),
        slug: "demo".into(),
        base_branch: "main".into(),
        worktree_root: project.join(".sprint/worktrees"),
        branch_pattern: "{prefix}/{sprint}/issue-{issue}".into(),
        max_parallel_sessions: 2,
        max_issues_per_sprint: 8,
        max_retries: 2,
        flags,
        session_timeout_ms: 30_000,
        phases: HashMap::new(),
        quality: QualityGateConfig {
            require_tests: true,
            require_lint: false,
            require_types: false,
            require_build: false,
            test_command: Some("true".into()),
            lint_command: None,
            typecheck_command: None,
            build_command: None,
            max_diff_lines: 500,
            expected_files: None,
        },
    }
}

pub struct Fixture {
    pub project: tempfile::TempDir,
    pub agent: Arc<ScriptedAgent>,
    pub forge: Arc<RecordingForge>,
    pub bus: EventBus,
    pub control: SessionControl,
    pub deps: Arc<ExecutorDeps>,
}

/// A project repo with templates, a scripted agent, and a recording forge.
pub fn fixture(flags: FeatureFlags) -> Fixture {
    let project = tempfile::TempDir::new().unwrap();
    init_repo(project.path());
    write_templates(&project.path().join("prompts"));

    let agent = ScriptedAgent::new();
    let forge = RecordingForge::new();
    let bus = EventBus::new();
    let control = SessionControl::new();
    let config = sprint_config(project.path(), flags);

    let deps = Arc::new(ExecutorDeps {
        config,
        agent: agent.clone() as Arc<dyn AgentSessions>,
        forge: forge.clone() as Arc<dyn ForgeApi>,
        worktrees: Worktrees::new(project.path()),
        bus: bus.clone(),
        control: control.clone(),
        templates: Arc::new(TemplateStore::new(project.path().join("prompts"))),
        project_name: "Demo".into(),
        repo_owner: "acme".into(),
        repo_name: "demo".into(),
        log_path: project.path().join("docs/sprints/demo-1-log.md"),
    });

    Fixture {
        project,
        agent,
        forge,
        bus,
        control,
        deps,
    }
}

/// Swap the gate's test command, rebuilding the shared deps.
pub fn with_test_command(fx: Fixture, command: &str) -> Fixture {
    let mut config = fx.deps.config.clone();
    config.quality.test_command = Some(command.to_string());
    rebuild_deps(fx, config)
}

/// Rebuild the fixture around an adjusted sprint config.
pub fn rebuild_deps(fx: Fixture, config: SprintConfig) -> Fixture {
    let deps = Arc::new(ExecutorDeps {
        config,
        agent: fx.deps.agent.clone(),
        forge: fx.deps.forge.clone(),
        worktrees: fx.deps.worktrees.clone(),
        bus: fx.deps.bus.clone(),
        control: fx.deps.control.clone(),
        templates: fx.deps.templates.clone(),
        project_name: fx.deps.project_name.clone(),
        repo_owner: fx.deps.repo_owner.clone(),
        repo_name: fx.deps.repo_name.clone(),
        log_path: fx.deps.log_path.clone(),
    });
    Fixture { deps, ..fx }
}

pub fn issue(number: u32, title: &str, deps: &[u32], points: u32) -> SprintIssue {
    SprintIssue {
        number,
        title: title.to_string(),
        ice_score: 1.0,
        depends_on: deps.iter().copied().collect(),
        acceptance_criteria: String::new(),
        expected_files: Vec::new(),
        story_points: points,
    }
}
