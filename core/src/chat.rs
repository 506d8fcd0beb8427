//! Ad-hoc operator chat sessions.
//!
//! The dashboard collaborator opens one session per role on demand, streams
//! assistant chunks through the event bus (`worker:output`), forwards
//! operator text in, and tears the session down on close. Chat sessions use
//! the same agent client as the sprint runner but their own id namespace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sprint_events::EventBus;
use sprint_protocol::config::PhaseConfig;
use sprint_protocol::wire::SessionMode;
use sprint_protocol::AgentRole;

use crate::SprintError;
use crate::agent_api::AgentSessions;

/// A live chat, addressed by its `chat-…` id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatHandle {
    pub chat_id: String,
    pub session_id: String,
    pub role: AgentRole,
}

pub struct ChatService {
    agent: Arc<dyn AgentSessions>,
    bus: EventBus,
    project_path: PathBuf,
    phases: HashMap<AgentRole, PhaseConfig>,
    prompt_timeout: Duration,
    chats: Mutex<HashMap<String, ChatHandle>>,
    counter: AtomicU64,
}

impl ChatService {
    pub fn new(
        agent: Arc<dyn AgentSessions>,
        bus: EventBus,
        project_path: PathBuf,
        phases: HashMap<AgentRole, PhaseConfig>,
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            agent,
            bus,
            project_path,
            phases,
            prompt_timeout,
            chats: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Open a fresh session for `role`, rooted at the project path.
    pub async fn create(&self, role: AgentRole) -> Result<ChatHandle, SprintError> {
        let phase = self.phases.get(&role).cloned().unwrap_or_default();
        let session_id = self
            .agent
            .open_session(role, &self.project_path, phase.mcp_servers.clone(), None)
            .await?;
        self.agent.set_mode(&session_id, SessionMode::Agent).await?;
        if let Some(model) = &phase.model {
            self.agent.set_model(&session_id, model).await?;
        }

        let chat_id = format!("chat-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let handle = ChatHandle {
            chat_id: chat_id.clone(),
            session_id,
            role,
        };
        self.chats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, handle.clone());
        Ok(handle)
    }

    /// Forward operator text into the chat. Output chunks stream through
    /// the bus as the agent produces them; the final response is returned.
    pub async fn send(&self, chat_id: &str, text: &str) -> Result<String, SprintError> {
        let handle = self
            .handle(chat_id)
            .ok_or_else(|| SprintError::Setup(format!("unknown chat: {chat_id}")))?;
        let outcome = self
            .agent
            .prompt(&handle.session_id, text, self.prompt_timeout)
            .await?;
        Ok(outcome.response)
    }

    pub async fn close(&self, chat_id: &str) -> Result<(), SprintError> {
        let handle = {
            let mut chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
            chats.remove(chat_id)
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        self.agent.close_session(&handle.session_id).await?;
        Ok(())
    }

    pub fn handle(&self, chat_id: &str) -> Option<ChatHandle> {
        self.chats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<ChatHandle> {
        let chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
        let mut handles: Vec<ChatHandle> = chats.values().cloned().collect();
        handles.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));
        handles
    }

    /// The bus chats stream over; exposed for subscribers.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
