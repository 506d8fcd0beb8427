//! Session controller: operator message queues and stop signals.
//!
//! A process-wide registry shared between the dashboard collaborator (which
//! enqueues) and the issue executor (which drains between prompts). Purely
//! additive state; entries are removed with [`SessionControl::cleanup`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message queued by an operator for a running session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorMessage {
    /// Free-form kind tag, e.g. `guidance` or `question`.
    pub kind: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl OperatorMessage {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct ControlEntry {
    queue: VecDeque<OperatorMessage>,
    stop_requested: bool,
}

/// Cloneable handle to the shared per-session control state.
#[derive(Clone, Default)]
pub struct SessionControl {
    entries: Arc<Mutex<HashMap<String, ControlEntry>>>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, session_id: &str, message: OperatorMessage) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(session_id.to_string())
            .or_default()
            .queue
            .push_back(message);
    }

    /// Return all pending messages in FIFO order and clear the queue.
    pub fn drain(&self, session_id: &str) -> Vec<OperatorMessage> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get_mut(session_id)
            .map(|entry| entry.queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(session_id)
            .is_some_and(|entry| !entry.queue.is_empty())
    }

    pub fn request_stop(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(session_id.to_string())
            .or_default()
            .stop_requested = true;
    }

    /// Consume-on-read stop flag: returns true at most once per request.
    pub fn should_stop(&self, session_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(session_id) {
            Some(entry) if entry.stop_requested => {
                entry.stop_requested = false;
                true
            }
            _ => false,
        }
    }

    pub fn cleanup(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_fifo_and_clears() {
        let control = SessionControl::new();
        control.enqueue("s1", OperatorMessage::new("guidance", "first"));
        control.enqueue("s1", OperatorMessage::new("guidance", "second"));
        assert!(control.has_pending("s1"));

        let drained = control.drain("s1");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].content, "first");
        assert_eq!(drained[1].content, "second");
        assert!(!control.has_pending("s1"));
        assert!(control.drain("s1").is_empty());
    }

    #[test]
    fn stop_flag_consumes_on_read() {
        let control = SessionControl::new();
        assert!(!control.should_stop("s1"));
        control.request_stop("s1");
        assert!(control.should_stop("s1"));
        assert!(!control.should_stop("s1"));
    }

    #[test]
    fn cleanup_drops_queue_and_flag() {
        let control = SessionControl::new();
        control.enqueue("s1", OperatorMessage::new("guidance", "msg"));
        control.request_stop("s1");
        control.cleanup("s1");
        assert!(!control.has_pending("s1"));
        assert!(!control.should_stop("s1"));
    }

    #[test]
    fn sessions_are_independent() {
        let control = SessionControl::new();
        control.enqueue("a", OperatorMessage::new("guidance", "for a"));
        control.request_stop("b");
        assert!(control.has_pending("a"));
        assert!(!control.has_pending("b"));
        assert!(control.should_stop("b"));
        assert!(!control.should_stop("a"));
    }
}
