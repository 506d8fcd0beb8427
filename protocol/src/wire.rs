//! Wire protocol spoken with the coding-assistant child process.
//!
//! Newline-delimited JSON over stdio. Three message shapes share the stream:
//!
//! ```text
//! {"id":1,"method":"session/prompt","params":{...}}   client -> agent request
//! {"id":1,"result":{...}} / {"id":1,"error":{...}}    agent -> client response
//! {"method":"session/update","params":{...}}          agent -> client notification
//! {"id":9,"method":"session/request_permission",...}  agent -> client request
//! ```
//!
//! A message carrying both `id` and `method` is an incoming request; `id`
//! without `method` is a response; `method` without `id` is a notification.

use serde::{Deserialize, Serialize};

use crate::config::McpServerConfig;

/// Protocol version negotiated during the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "1";

// Method names.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SESSION_NEW: &str = "session/new";
pub const METHOD_SESSION_END: &str = "session/end";
pub const METHOD_SESSION_SET_MODE: &str = "session/set_mode";
pub const METHOD_SESSION_SET_MODEL: &str = "session/set_model";
pub const METHOD_SESSION_PROMPT: &str = "session/prompt";
pub const METHOD_SESSION_UPDATE: &str = "session/update";
pub const METHOD_REQUEST_PERMISSION: &str = "session/request_permission";

pub type RequestId = u64;

/// Error object inside a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

/// Raw wire message; classified by which fields are present.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Classified view of a [`RawMessage`].
#[derive(Debug)]
pub enum MessageKind {
    /// Response to a request we sent.
    Response { id: RequestId },
    /// Fire-and-forget notification from the agent.
    Notification { method: String },
    /// Request from the agent that expects a response (permissions).
    IncomingRequest { id: RequestId, method: String },
    /// Unrecognised shape; logged and dropped.
    Malformed,
}

impl RawMessage {
    pub fn kind(&self) -> MessageKind {
        match (self.id, self.method.as_deref()) {
            (Some(id), Some(method)) => MessageKind::IncomingRequest {
                id,
                method: method.to_string(),
            },
            (Some(id), None) => MessageKind::Response { id },
            (None, Some(method)) => MessageKind::Notification {
                method: method.to_string(),
            },
            (None, None) => MessageKind::Malformed,
        }
    }

    pub fn request(id: RequestId, method: &str, params: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
    /// Whether the client answers `session/request_permission`.
    #[serde(default)]
    pub supports_permission_requests: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Session interaction mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Agent,
    Plan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSessionParams {
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSessionResult {
    pub session_id: String,
    #[serde(default)]
    pub available_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndSessionParams {
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetModeParams {
    pub session_id: String,
    pub mode: SessionMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetModelParams {
    pub session_id: String,
    pub model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptParams {
    pub session_id: String,
    pub text: String,
}

/// Why a prompt turn ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Cancelled,
    Refusal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptResult {
    pub response: String,
    pub stop_reason: StopReason,
}

/// Streaming output chunk for an in-flight prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub session_id: String,
    pub text: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PermissionOption {
    pub option_id: String,
    pub kind: PermissionOptionKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionRequestParams {
    pub session_id: String,
    pub tool_name: String,
    pub options: Vec<PermissionOption>,
}

/// Our answer to a permission request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    Selected { option_id: String },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kinds_classify_by_fields() {
        let response: RawMessage =
            serde_json::from_str(r#"{"id":4,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(response.kind(), MessageKind::Response { id: 4 }));

        let notification: RawMessage =
            serde_json::from_str(r#"{"method":"session/update","params":{}}"#).unwrap();
        assert!(matches!(
            notification.kind(),
            MessageKind::Notification { method } if method == METHOD_SESSION_UPDATE
        ));

        let incoming: RawMessage = serde_json::from_str(
            r#"{"id":9,"method":"session/request_permission","params":{}}"#,
        )
        .unwrap();
        assert!(matches!(
            incoming.kind(),
            MessageKind::IncomingRequest { id: 9, .. }
        ));
    }

    #[test]
    fn permission_outcome_wire_shape() {
        let selected = PermissionOutcome::Selected {
            option_id: "opt-1".into(),
        };
        let json = serde_json::to_value(&selected).unwrap();
        assert_eq!(json["outcome"], "selected");
        assert_eq!(json["option_id"], "opt-1");

        let cancelled = serde_json::to_value(PermissionOutcome::Cancelled).unwrap();
        assert_eq!(cancelled["outcome"], "cancelled");
    }
}
