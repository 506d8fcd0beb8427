//! Sprint orchestration core.
//!
//! Everything between the leaf crates and the CLI: the dependency grouper,
//! prompt templates, the per-issue executor, the parallel dispatcher, the
//! sprint runner state machine with its persistence, and the chat service
//! used by the dashboard collaborator.

pub mod agent_api;
pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod escalation;
pub mod executor;
pub mod grouper;
pub mod metrics;
pub mod prompt;
pub mod runner;
pub mod sprint_log;
pub mod state_store;
pub mod velocity;

pub use agent_api::AgentSessions;
pub use config::ProjectConfig;

use sprint_agent_client::AgentClientError;
use sprint_forge::ForgeError;
use sprint_git_tooling::GitError;
use sprint_quality::QualityError;

/// Errors that abort an issue or a sprint phase.
///
/// Transient side-effect failures (comments, labels, cleanup) are absorbed
/// with warnings where they occur and never surface through this type.
#[derive(Debug, thiserror::Error)]
pub enum SprintError {
    #[error("setup error: {0}")]
    Setup(String),

    #[error("agent error: {0}")]
    Agent(#[from] AgentClientError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("quality gate error: {0}")]
    Quality(#[from] QualityError),

    #[error("prompt template error: {0}")]
    Prompt(#[from] prompt::PromptError),

    #[error("state persistence error: {0}")]
    State(#[from] state_store::StateError),

    #[error("plan validation failed: {0}")]
    Plan(#[from] sprint_protocol::PlanError),

    #[error("dependency cycle: {0}")]
    Grouper(#[from] grouper::GrouperError),

    #[error("sprint stopped by operator")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SprintError {
    /// Whether the underlying failure was a prompt deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Agent(AgentClientError::Timeout))
    }
}
