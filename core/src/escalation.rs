//! Stakeholder escalation collaborator.
//!
//! The dispatcher calls this when a whole execution group fails; richer
//! integrations (chat, pager) implement the trait outside this crate.

use async_trait::async_trait;
use sprint_events::{EventBus, LogLevel, SprintEvent};

/// Urgency of an escalation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EscalationLevel {
    /// Worth a look when convenient.
    Should,
    /// A human must intervene before the sprint can make progress.
    Must,
}

#[async_trait]
pub trait Escalation: Send + Sync {
    async fn escalate(&self, level: EscalationLevel, message: &str);
}

/// Default collaborator: logs and emits a `sprint:error` event.
pub struct LogEscalation {
    bus: EventBus,
}

impl LogEscalation {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Escalation for LogEscalation {
    async fn escalate(&self, level: EscalationLevel, message: &str) {
        match level {
            EscalationLevel::Should => {
                tracing::warn!("escalation (should): {message}");
                self.bus.log(LogLevel::Warn, message);
            }
            EscalationLevel::Must => {
                tracing::error!("escalation (must): {message}");
                self.bus.emit(SprintEvent::SprintError {
                    error: message.to_string(),
                });
            }
        }
    }
}
