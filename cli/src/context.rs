//! Shared wiring: config, agent client, forge, and runner construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sprint_agent_client::{AgentClient, AgentClientConfig, SessionControl};
use sprint_core::config::ProjectConfig;
use sprint_core::escalation::LogEscalation;
use sprint_core::executor::{ExecutorDeps, IssueExecutor};
use sprint_core::prompt::TemplateStore;
use sprint_core::runner::{RunnerDeps, SprintRunner};
use sprint_events::{EventBus, EventKind, SprintEvent};
use sprint_forge::{ForgeApi, GithubForge};
use sprint_git_tooling::Worktrees;
use sprint_protocol::{IssueResult, SprintIssue};

/// A connected CLI session: one agent process, one forge client.
pub struct Session {
    pub project_path: PathBuf,
    pub config: ProjectConfig,
    pub bus: EventBus,
    pub client: Arc<AgentClient>,
    pub forge: Arc<dyn ForgeApi>,
    pub control: SessionControl,
}

impl Session {
    /// Load the project config, connect the agent, build the forge client.
    pub async fn start(project_path: &Path) -> anyhow::Result<Self> {
        let config_path = project_path.join("sprint.toml");
        let config = ProjectConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;

        let token = std::env::var("GITHUB_TOKEN")
            .context("GITHUB_TOKEN must be set for forge access")?;
        let forge: Arc<dyn ForgeApi> = Arc::new(GithubForge::new(
            config.project.repo_owner.clone(),
            config.project.repo_name.clone(),
            token,
        ));

        let bus = EventBus::new();
        // Mirror log events onto stderr via tracing; listeners stay
        // non-blocking.
        bus.on(EventKind::Log, |event| {
            if let SprintEvent::Log { level, message } = event {
                tracing::info!(?level, "{message}");
            }
        });

        let mut agent_config = AgentClientConfig::new(config.agent.program.clone());
        agent_config.args.clone_from(&config.agent.args);
        agent_config.permissions = config.agent.permission_policy();
        let client = Arc::new(AgentClient::new(agent_config, bus.clone()));
        client
            .connect()
            .await
            .context("connecting to the coding agent")?;

        Ok(Self {
            project_path: project_path.to_path_buf(),
            config,
            bus,
            client,
            forge,
            control: SessionControl::new(),
        })
    }

    pub fn runner(&self, sprint: u32) -> anyhow::Result<SprintRunner> {
        let deps = RunnerDeps {
            project_path: self.project_path.clone(),
            project: self.config.clone(),
            agent: self.client.clone(),
            forge: self.forge.clone(),
            bus: self.bus.clone(),
            control: self.control.clone(),
            escalation: Arc::new(LogEscalation::new(self.bus.clone())),
        };
        Ok(SprintRunner::new(deps, sprint)?)
    }

    /// Fetch one forge issue and run it through the pipeline.
    pub async fn execute_issue(&self, sprint: u32, issue: u32) -> anyhow::Result<IssueResult> {
        let forge_issue = self.forge.get_issue(issue as u64).await?;
        let sprint_issue = SprintIssue {
            number: issue,
            title: forge_issue.title,
            ice_score: 0.0,
            depends_on: Default::default(),
            acceptance_criteria: forge_issue.body,
            expected_files: Vec::new(),
            story_points: 0,
        };

        let sprint_config = self.config.sprint_config(sprint, &self.project_path);
        let deps = Arc::new(ExecutorDeps {
            config: sprint_config,
            agent: self.client.clone(),
            forge: self.forge.clone(),
            worktrees: Worktrees::new(&self.project_path),
            bus: self.bus.clone(),
            control: self.control.clone(),
            templates: Arc::new(TemplateStore::new(
                self.config.prompts_dir(&self.project_path),
            )),
            project_name: self.config.project.name.clone(),
            repo_owner: self.config.project.repo_owner.clone(),
            repo_name: self.config.project.repo_name.clone(),
            log_path: self.config.log_path(&self.project_path, sprint),
        });

        Ok(IssueExecutor::new(deps).execute(&sprint_issue).await)
    }

    pub async fn shutdown(&self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!("agent disconnect failed: {err}");
        }
    }
}
