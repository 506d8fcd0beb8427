//! Client for the coding-assistant child process.
//!
//! Owns one long-lived subprocess speaking newline-delimited JSON (see
//! `sprint_protocol::wire`), multiplexes any number of concurrent sessions
//! over it, streams incremental output into per-session ring buffers, and
//! enforces prompt deadlines. Also home to the process-wide session
//! controller used to feed operator messages into running sessions.

mod client;
mod control;
mod permission;
mod session;

pub use client::{AgentClient, AgentClientConfig};
pub use control::{OperatorMessage, SessionControl};
pub use permission::PermissionPolicy;
pub use session::{SessionInfo, SessionRegistry};

/// Errors surfaced by the agent client.
#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("agent client is not connected")]
    NotConnected,

    #[error("agent executable not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    #[error("prompt deadline elapsed")]
    Timeout,

    #[error("agent process exited with prompts in flight")]
    ProcessExited,

    #[error("agent error {code}: {message}")]
    Agent { code: i64, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
