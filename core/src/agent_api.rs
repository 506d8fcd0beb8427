//! The session operations the orchestrator needs from the agent client.
//!
//! A thin trait so the executor, runner, chat service, and prompt bench can
//! be driven by a scripted agent in tests. The production implementation is
//! [`sprint_agent_client::AgentClient`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sprint_agent_client::{AgentClient, AgentClientError};
use sprint_protocol::AgentRole;
use sprint_protocol::config::McpServerConfig;
use sprint_protocol::wire::{PromptResult, SessionMode};

#[async_trait]
pub trait AgentSessions: Send + Sync {
    /// Open a session rooted at `cwd`; returns the agent-assigned id.
    async fn open_session(
        &self,
        role: AgentRole,
        cwd: &Path,
        mcp_servers: Vec<McpServerConfig>,
        issue_number: Option<u32>,
    ) -> Result<String, AgentClientError>;

    async fn set_mode(&self, session_id: &str, mode: SessionMode)
    -> Result<(), AgentClientError>;

    async fn set_model(&self, session_id: &str, model: &str) -> Result<(), AgentClientError>;

    async fn prompt(
        &self,
        session_id: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<PromptResult, AgentClientError>;

    async fn close_session(&self, session_id: &str) -> Result<(), AgentClientError>;

    /// Snapshot of the session's most recent output chunks.
    fn output_tail(&self, session_id: &str, last_n: usize) -> Vec<String>;
}

#[async_trait]
impl AgentSessions for AgentClient {
    async fn open_session(
        &self,
        role: AgentRole,
        cwd: &Path,
        mcp_servers: Vec<McpServerConfig>,
        issue_number: Option<u32>,
    ) -> Result<String, AgentClientError> {
        let info = self
            .create_session(role, cwd, mcp_servers, issue_number)
            .await?;
        Ok(info.session_id)
    }

    async fn set_mode(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> Result<(), AgentClientError> {
        AgentClient::set_mode(self, session_id, mode).await
    }

    async fn set_model(&self, session_id: &str, model: &str) -> Result<(), AgentClientError> {
        AgentClient::set_model(self, session_id, model).await
    }

    async fn prompt(
        &self,
        session_id: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<PromptResult, AgentClientError> {
        self.send_prompt(session_id, text, timeout).await
    }

    async fn close_session(&self, session_id: &str) -> Result<(), AgentClientError> {
        self.end_session(session_id).await
    }

    fn output_tail(&self, session_id: &str, last_n: usize) -> Vec<String> {
        self.session_output(session_id, last_n)
    }
}
