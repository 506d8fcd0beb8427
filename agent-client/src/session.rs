//! Tracked sessions and their bounded output buffers.
//!
//! The stdout reader task is the single writer; everyone else takes
//! snapshot copies so readers never block streaming.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sprint_protocol::AgentRole;

/// Hard cap on retained output chunks per session.
const OUTPUT_BUFFER_CHUNKS: usize = 500;

struct TrackedSession {
    role: AgentRole,
    issue_number: Option<u32>,
    model: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    output: VecDeque<String>,
}

/// Snapshot view of a tracked session, without the output buffer.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub role: AgentRole,
    pub issue_number: Option<u32>,
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output_chunks: usize,
}

/// Table of sessions known to one agent client.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, TrackedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        session_id: &str,
        role: AgentRole,
        issue_number: Option<u32>,
        model: Option<String>,
    ) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session_id.to_string(),
            TrackedSession {
                role,
                issue_number,
                model,
                started_at: Utc::now(),
                ended_at: None,
                output: VecDeque::new(),
            },
        );
    }

    /// Append one output chunk; the buffer is append-only until the session
    /// ends and bounded by chunk count.
    pub fn append_output(&self, session_id: &str, chunk: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            if session.ended_at.is_some() {
                return;
            }
            if session.output.len() == OUTPUT_BUFFER_CHUNKS {
                session.output.pop_front();
            }
            session.output.push_back(chunk.to_string());
        }
    }

    pub fn set_model(&self, session_id: &str, model: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            session.model = Some(model.to_string());
        }
    }

    pub fn mark_ended(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            session.ended_at = Some(Utc::now());
        }
    }

    /// Mark every live session as ended (process teardown).
    pub fn mark_all_ended(&self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        for session in sessions.values_mut() {
            session.ended_at.get_or_insert(now);
        }
    }

    /// Snapshot of the last `last_n` output chunks.
    pub fn output_tail(&self, session_id: &str, last_n: usize) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|session| {
                let skip = session.output.len().saturating_sub(last_n);
                session.output.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|s| SessionInfo {
            session_id: session_id.to_string(),
            role: s.role,
            issue_number: s.issue_number,
            model: s.model.clone(),
            started_at: s.started_at,
            ended_at: s.ended_at,
            output_chunks: s.output.len(),
        })
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                session_id: id.clone(),
                role: s.role,
                issue_number: s.issue_number,
                model: s.model.clone(),
                started_at: s.started_at,
                ended_at: s.ended_at,
                output_chunks: s.output.len(),
            })
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_buffer_is_bounded() {
        let registry = SessionRegistry::new();
        registry.insert("s1", AgentRole::Developer, Some(42), None);
        for n in 0..600 {
            registry.append_output("s1", &format!("chunk {n}"));
        }

        let tail = registry.output_tail("s1", 1000);
        assert_eq!(tail.len(), OUTPUT_BUFFER_CHUNKS);
        assert_eq!(tail[0], "chunk 100");
        assert_eq!(tail.last().unwrap(), "chunk 599");
    }

    #[test]
    fn output_tail_returns_last_n() {
        let registry = SessionRegistry::new();
        registry.insert("s1", AgentRole::Planner, None, None);
        for n in 0..10 {
            registry.append_output("s1", &format!("{n}"));
        }
        assert_eq!(registry.output_tail("s1", 3), vec!["7", "8", "9"]);
        assert!(registry.output_tail("missing", 3).is_empty());
    }

    #[test]
    fn ended_sessions_stop_accepting_output() {
        let registry = SessionRegistry::new();
        registry.insert("s1", AgentRole::Developer, None, None);
        registry.append_output("s1", "before");
        registry.mark_ended("s1");
        registry.append_output("s1", "after");
        assert_eq!(registry.output_tail("s1", 10), vec!["before"]);
    }
}
