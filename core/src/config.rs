//! Project configuration (`sprint.toml`) and the paths derived from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sprint_agent_client::PermissionPolicy;
use sprint_protocol::config::{
    DEFAULT_BRANCH_PATTERN, FeatureFlags, PhaseConfig, QualityGateConfig, SprintConfig,
};
use sprint_protocol::AgentRole;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectSection {
    pub name: String,
    pub repo_owner: String,
    pub repo_name: String,
    /// Slug for branch and file naming, defaults to the repo name.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_worktree_root")]
    pub worktree_root: PathBuf,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_milestone_prefix")]
    pub milestone_prefix: String,
}

fn default_prefix() -> String {
    "sprint".to_string()
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_worktree_root() -> PathBuf {
    PathBuf::from(".sprint/worktrees")
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_milestone_prefix() -> String {
    "Sprint".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_max_parallel")]
    pub max_parallel_sessions: usize,
    #[serde(default = "default_max_issues")]
    pub max_issues_per_sprint: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

fn default_max_parallel() -> usize {
    2
}
fn default_max_issues() -> usize {
    8
}
fn default_max_retries() -> u32 {
    2
}
fn default_session_timeout_ms() -> u64 {
    600_000
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_parallel_sessions: default_max_parallel(),
            max_issues_per_sprint: default_max_issues(),
            max_retries: default_max_retries(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

/// How to launch the coding-assistant executable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

fn default_agent_program() -> PathBuf {
    PathBuf::from("claude")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: Vec::new(),
            auto_approve: false,
            allowed_tools: Vec::new(),
        }
    }
}

impl AgentSection {
    pub fn permission_policy(&self) -> PermissionPolicy {
        PermissionPolicy {
            auto_approve: self.auto_approve,
            allowed_tools: self.allowed_tools.clone(),
        }
    }
}

/// Parsed `sprint.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub flags: FeatureFlags,
    #[serde(default)]
    pub quality: QualityGateConfig,
    #[serde(default)]
    pub agent: AgentSection,
    /// Per-role session configuration, keyed by role name.
    #[serde(default)]
    pub phases: HashMap<String, PhaseConfig>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.run.max_parallel_sessions == 0 {
            return Err(ConfigError::Invalid(
                "run.max_parallel_sessions must be at least 1".to_string(),
            ));
        }
        for key in self.phases.keys() {
            if role_from_key(key).is_none() {
                return Err(ConfigError::Invalid(format!("unknown phase role: {key}")));
            }
        }
        Ok(())
    }

    pub fn slug(&self) -> &str {
        self.project
            .slug
            .as_deref()
            .unwrap_or(&self.project.repo_name)
    }

    /// Build the immutable per-sprint configuration. Relative paths are
    /// resolved against `project_path`.
    pub fn sprint_config(&self, sprint_number: u32, project_path: &Path) -> SprintConfig {
        let phases = self
            .phases
            .iter()
            .filter_map(|(key, phase)| role_from_key(key).map(|role| (role, phase.clone())))
            .collect();

        SprintConfig {
            sprint_number,
            prefix: self.project.prefix.clone(),
            slug: self.slug().to_string(),
            base_branch: self.project.base_branch.clone(),
            worktree_root: resolve(project_path, &self.project.worktree_root),
            branch_pattern: DEFAULT_BRANCH_PATTERN.to_string(),
            max_parallel_sessions: self.run.max_parallel_sessions,
            max_issues_per_sprint: self.run.max_issues_per_sprint,
            max_retries: self.run.max_retries,
            flags: self.flags,
            session_timeout_ms: self.run.session_timeout_ms,
            phases,
            quality: self.quality.clone(),
        }
    }

    pub fn prompts_dir(&self, project_path: &Path) -> PathBuf {
        resolve(project_path, &self.project.prompts_dir)
    }

    /// `docs/sprints/` under the project, home of state, logs and velocity.
    pub fn sprints_dir(project_path: &Path) -> PathBuf {
        project_path.join("docs").join("sprints")
    }

    pub fn log_path(&self, project_path: &Path, sprint_number: u32) -> PathBuf {
        Self::sprints_dir(project_path).join(format!("{}-{sprint_number}-log.md", self.slug()))
    }

    pub fn velocity_path(project_path: &Path) -> PathBuf {
        Self::sprints_dir(project_path).join("velocity.md")
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn role_from_key(key: &str) -> Option<AgentRole> {
    AgentRole::all().into_iter().find(|r| r.as_str() == key)
}
