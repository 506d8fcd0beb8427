//! Typed publish/subscribe hub for sprint progress.
//!
//! Delivery is synchronous and in registration order; a panicking listener
//! is isolated so it cannot abort delivery to later listeners. A bounded
//! replay buffer lets late subscribers reconstruct recent activity, and a
//! broadcast channel carries the same stream to async consumers (chat
//! service, dashboard collaborator). Listeners must not block on I/O; async
//! work goes through [`EventBus::subscribe`].

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sprint_protocol::{AgentRole, SprintIssue};
use tokio::sync::broadcast;

/// How many recent events the replay buffer retains.
const REPLAY_CAPACITY: usize = 256;

/// Broadcast channel depth for async subscribers.
const BROADCAST_CAPACITY: usize = 1024;

/// Log level carried by [`SprintEvent::Log`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Every event the runner publishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SprintEvent {
    SprintStart {
        sprint_number: u32,
    },
    SprintPlanned {
        issues: Vec<SprintIssue>,
    },
    SprintComplete {
        sprint_number: u32,
    },
    SprintError {
        error: String,
    },
    SprintPaused,
    SprintResumed,
    PhaseChange {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<AgentRole>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    IssueStart {
        issue: SprintIssue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    IssueProgress {
        issue_number: u32,
        step: String,
    },
    IssueDone {
        issue_number: u32,
        duration_ms: u64,
    },
    IssueFail {
        issue_number: u32,
        reason: String,
    },
    SessionStart {
        session_id: String,
        role: AgentRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_number: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    SessionEnd {
        session_id: String,
    },
    WorkerOutput {
        session_id: String,
        text: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// Discriminant used for listener registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    SprintStart,
    SprintPlanned,
    SprintComplete,
    SprintError,
    SprintPaused,
    SprintResumed,
    PhaseChange,
    IssueStart,
    IssueProgress,
    IssueDone,
    IssueFail,
    SessionStart,
    SessionEnd,
    WorkerOutput,
    Log,
}

impl SprintEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SprintStart { .. } => EventKind::SprintStart,
            Self::SprintPlanned { .. } => EventKind::SprintPlanned,
            Self::SprintComplete { .. } => EventKind::SprintComplete,
            Self::SprintError { .. } => EventKind::SprintError,
            Self::SprintPaused => EventKind::SprintPaused,
            Self::SprintResumed => EventKind::SprintResumed,
            Self::PhaseChange { .. } => EventKind::PhaseChange,
            Self::IssueStart { .. } => EventKind::IssueStart,
            Self::IssueProgress { .. } => EventKind::IssueProgress,
            Self::IssueDone { .. } => EventKind::IssueDone,
            Self::IssueFail { .. } => EventKind::IssueFail,
            Self::SessionStart { .. } => EventKind::SessionStart,
            Self::SessionEnd { .. } => EventKind::SessionEnd,
            Self::WorkerOutput { .. } => EventKind::WorkerOutput,
            Self::Log { .. } => EventKind::Log,
        }
    }
}

/// Handle returned by [`EventBus::on`]; pass to [`EventBus::off`] to
/// unregister.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&SprintEvent) + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

struct BusState {
    listeners: Vec<Registration>,
    replay: VecDeque<SprintEvent>,
}

/// The shared event bus. Cheap to clone; all clones publish to the same
/// listeners and replay buffer.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    next_id: Arc<AtomicU64>,
    broadcast_tx: broadcast::Sender<SprintEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(BusState {
                listeners: Vec::new(),
                replay: VecDeque::with_capacity(REPLAY_CAPACITY),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            broadcast_tx,
        }
    }

    /// Register a listener for one event kind. Listeners run synchronously
    /// on the emitter's task and must not block.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&SprintEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.listeners.push(Registration {
            id,
            kind,
            listener: Box::new(listener),
        });
        id
    }

    pub fn off(&self, id: ListenerId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.listeners.retain(|r| r.id != id);
    }

    /// Drop every registered listener. Used on dashboard shutdown.
    pub fn remove_all_listeners(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.listeners.clear();
    }

    /// Deliver synchronously to all listeners registered for the event's
    /// kind, in registration order. A listener panic is caught and logged so
    /// later listeners still run.
    pub fn emit(&self, event: SprintEvent) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.replay.len() == REPLAY_CAPACITY {
                state.replay.pop_front();
            }
            state.replay.push_back(event.clone());

            let kind = event.kind();
            for reg in state.listeners.iter().filter(|r| r.kind == kind) {
                if catch_unwind(AssertUnwindSafe(|| (reg.listener)(&event))).is_err() {
                    tracing::warn!(?kind, "event listener panicked; continuing delivery");
                }
            }
        }

        // Lagging async subscribers drop oldest events; that is acceptable
        // for progress streams.
        let _ = self.broadcast_tx.send(event);
    }

    /// Snapshot of the replay buffer, oldest first.
    pub fn replay(&self) -> Vec<SprintEvent> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.replay.iter().cloned().collect()
    }

    /// Async subscription carrying every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SprintEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Convenience: emit a [`SprintEvent::Log`].
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(SprintEvent::Log {
            level,
            message: message.into(),
        });
    }
}
