//! Sprint configuration.
//!
//! Built once per sprint from the parsed project config plus the sprint
//! number, then passed by value to every component. Immutable for a run.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::role::AgentRole;

/// Default branch-name pattern; `{prefix}`, `{sprint}` and `{issue}` are the
/// only recognised substitutions.
pub const DEFAULT_BRANCH_PATTERN: &str = "{prefix}/{sprint}/issue-{issue}";

/// A tool server the agent may call, configured per phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpServerConfig {
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Http {
        name: String,
        url: String,
    },
    Sse {
        name: String,
        url: String,
    },
}

impl McpServerConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } | Self::Http { name, .. } | Self::Sse { name, .. } => name,
        }
    }
}

/// Per-role agent session configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Model id to select for the session; empty means the agent default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    /// Instruction files prepended to the rendered prompt, in order.
    #[serde(default)]
    pub instruction_files: Vec<PathBuf>,
}

/// Feature flags toggling optional pipeline stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub challenger: bool,
    #[serde(default)]
    pub tdd: bool,
    #[serde(default)]
    pub auto_merge: bool,
    #[serde(default)]
    pub squash_merge: bool,
    #[serde(default)]
    pub delete_branch_on_merge: bool,
    #[serde(default)]
    pub auto_revert_drift: bool,
}

/// Quality gate configuration, carried inside the sprint config and handed
/// to the gate together with the per-issue `expected_files`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityGateConfig {
    #[serde(default = "default_true")]
    pub require_tests: bool,
    #[serde(default = "default_true")]
    pub require_lint: bool,
    #[serde(default = "default_true")]
    pub require_types: bool,
    #[serde(default)]
    pub require_build: bool,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub lint_command: Option<String>,
    #[serde(default)]
    pub typecheck_command: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: u64,
    /// When set, any changed file outside this list fails `scope_drift`.
    #[serde(default)]
    pub expected_files: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_max_diff_lines() -> u64 {
    1500
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            require_tests: true,
            require_lint: true,
            require_types: true,
            require_build: false,
            test_command: None,
            lint_command: None,
            typecheck_command: None,
            build_command: None,
            max_diff_lines: default_max_diff_lines(),
            expected_files: None,
        }
    }
}

/// Immutable configuration for one sprint run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintConfig {
    pub sprint_number: u32,
    /// Branch prefix, e.g. `sprint`.
    pub prefix: String,
    /// Slug for branch and file naming, e.g. `acme-api`.
    pub slug: String,
    pub base_branch: String,
    /// Directory under which per-issue worktrees are created.
    pub worktree_root: PathBuf,
    #[serde(default = "default_branch_pattern")]
    pub branch_pattern: String,
    pub max_parallel_sessions: usize,
    pub max_issues_per_sprint: usize,
    pub max_retries: u32,
    #[serde(default)]
    pub flags: FeatureFlags,
    pub session_timeout_ms: u64,
    /// Per-role session configuration.
    #[serde(default)]
    pub phases: HashMap<AgentRole, PhaseConfig>,
    #[serde(default)]
    pub quality: QualityGateConfig,
}

fn default_branch_pattern() -> String {
    DEFAULT_BRANCH_PATTERN.to_string()
}

impl SprintConfig {
    /// Expand the branch pattern for one issue,
    /// e.g. `sprint/3/issue-42`.
    pub fn branch_name(&self, issue_number: u32) -> String {
        self.branch_pattern
            .replace("{prefix}", &self.prefix)
            .replace("{sprint}", &self.sprint_number.to_string())
            .replace("{issue}", &issue_number.to_string())
    }

    /// Worktree path for one issue: `<worktree_root>/issue-<n>`.
    pub fn worktree_path(&self, issue_number: u32) -> PathBuf {
        self.worktree_root.join(format!("issue-{issue_number}"))
    }

    /// Phase configuration for a role, or the default when unset.
    pub fn phase(&self, role: AgentRole) -> PhaseConfig {
        self.phases.get(&role).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SprintConfig {
        SprintConfig {
            sprint_number: 3,
            prefix: "sprint".into(),
            slug: "demo".into(),
            base_branch: "main".into(),
            worktree_root: PathBuf::from("/tmp/worktrees"),
            branch_pattern: DEFAULT_BRANCH_PATTERN.into(),
            max_parallel_sessions: 2,
            max_issues_per_sprint: 8,
            max_retries: 2,
            flags: FeatureFlags::default(),
            session_timeout_ms: 600_000,
            phases: HashMap::new(),
            quality: QualityGateConfig::default(),
        }
    }

    #[test]
    fn branch_name_expands_default_pattern() {
        assert_eq!(config().branch_name(42), "sprint/3/issue-42");
    }

    #[test]
    fn branch_name_honours_custom_pattern() {
        let mut cfg = config();
        cfg.branch_pattern = "{prefix}-{issue}".into();
        assert_eq!(cfg.branch_name(7), "sprint-7");
    }

    #[test]
    fn worktree_path_is_per_issue() {
        assert_eq!(
            config().worktree_path(42),
            PathBuf::from("/tmp/worktrees/issue-42")
        );
    }
}
