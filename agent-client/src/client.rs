//! The agent client proper: process lifecycle, request/response plumbing,
//! and session commands.
//!
//! ## Task structure
//!
//! - one reader task demultiplexes framed stdout into the pending-response
//!   map, session ring buffers, and permission replies;
//! - one writer task serialises every stdin write through an mpsc channel;
//! - each `send_prompt` parks on a oneshot until its response arrives or
//!   the deadline fires.
//!
//! When the child exits, the reader drains the pending map and rejects every
//! in-flight request with `ProcessExited` so no caller is left dangling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use sprint_events::{EventBus, SprintEvent};
use sprint_protocol::AgentRole;
use sprint_protocol::config::McpServerConfig;
use sprint_protocol::wire::{
    EndSessionParams, InitializeParams, InitializeResult, MessageKind, NewSessionParams,
    NewSessionResult, PROTOCOL_VERSION, PermissionRequestParams, PromptParams, PromptResult,
    RawMessage, RequestId, SessionMode, SessionUpdateParams, SetModeParams, SetModelParams,
    METHOD_INITIALIZE, METHOD_REQUEST_PERMISSION, METHOD_SESSION_END, METHOD_SESSION_NEW,
    METHOD_SESSION_PROMPT, METHOD_SESSION_SET_MODE, METHOD_SESSION_SET_MODEL,
    METHOD_SESSION_UPDATE,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::permission::PermissionPolicy;
use crate::session::{SessionInfo, SessionRegistry};
use crate::AgentClientError;

/// Configuration for spawning the agent executable.
#[derive(Clone, Debug)]
pub struct AgentClientConfig {
    pub program: PathBuf,
    /// Protocol flags passed to the executable.
    pub args: Vec<String>,
    pub connect_timeout: Duration,
    /// How long to wait for a clean exit before killing on disconnect.
    pub shutdown_grace: Duration,
    pub permissions: PermissionPolicy,
}

impl AgentClientConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["--stdio-protocol".to_string()],
            connect_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            permissions: PermissionPolicy::default(),
        }
    }
}

type PendingSender = oneshot::Sender<Result<serde_json::Value, AgentClientError>>;
type ConnectResult = Option<Result<(), String>>;

/// State shared with the reader/writer tasks.
struct Shared {
    pending: std::sync::Mutex<HashMap<RequestId, PendingSender>>,
    next_id: AtomicU64,
    writer_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: AtomicBool,
    registry: SessionRegistry,
    permissions: PermissionPolicy,
    bus: EventBus,
}

impl Shared {
    /// Reject every in-flight request. Called on child exit and disconnect.
    fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(AgentClientError::ProcessExited));
        }
    }

    fn send_line(&self, line: String) -> Result<(), AgentClientError> {
        let writer = self.writer_tx.lock().unwrap_or_else(|e| e.into_inner());
        match writer.as_ref() {
            Some(tx) => tx.send(line).map_err(|_| AgentClientError::ProcessExited),
            None => Err(AgentClientError::ProcessExited),
        }
    }
}

enum ConnectionState {
    Disconnected,
    /// A connect is in flight; waiters clone the receiver.
    Connecting(watch::Receiver<ConnectResult>),
    Connected {
        child: Child,
    },
}

/// Client fronting one coding-assistant process.
pub struct AgentClient {
    config: AgentClientConfig,
    conn: Mutex<ConnectionState>,
    shared: Arc<Shared>,
    /// Per-session prompt serialisation: request N is observed before N+1.
    prompt_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    spawn_count: AtomicU64,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig, bus: EventBus) -> Self {
        let permissions = config.permissions.clone();
        Self {
            config,
            conn: Mutex::new(ConnectionState::Disconnected),
            shared: Arc::new(Shared {
                pending: std::sync::Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                writer_tx: std::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                registry: SessionRegistry::new(),
                permissions,
                bus,
            }),
            prompt_locks: Mutex::new(HashMap::new()),
            spawn_count: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// How many times a child process has been spawned. Diagnostics only.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Spawn the agent and perform the initialize handshake.
    ///
    /// Concurrent calls coalesce: while a connect is in flight, later
    /// callers wait on it instead of spawning a second process.
    pub async fn connect(&self) -> Result<(), AgentClientError> {
        enum Entry {
            Done,
            Join(watch::Receiver<ConnectResult>),
            Lead(watch::Sender<ConnectResult>),
        }

        let entry = {
            let mut conn = self.conn.lock().await;
            match &*conn {
                ConnectionState::Connected { .. } if self.is_connected() => Entry::Done,
                ConnectionState::Connecting(rx) => Entry::Join(rx.clone()),
                _ => {
                    // Disconnected, or a stale Connected whose child died.
                    let (tx, rx) = watch::channel(None);
                    *conn = ConnectionState::Connecting(rx);
                    Entry::Lead(tx)
                }
            }
        };

        match entry {
            Entry::Done => Ok(()),
            Entry::Join(mut rx) => loop {
                let settled = rx.borrow().clone();
                if let Some(result) = settled {
                    return result.map_err(AgentClientError::Handshake);
                }
                if rx.changed().await.is_err() {
                    return Err(AgentClientError::Handshake("connect aborted".to_string()));
                }
            },
            Entry::Lead(tx) => {
                let result = self.spawn_and_handshake().await;
                let mut conn = self.conn.lock().await;
                match result {
                    Ok(child) => {
                        *conn = ConnectionState::Connected { child };
                        self.shared.connected.store(true, Ordering::SeqCst);
                        let _ = tx.send(Some(Ok(())));
                        Ok(())
                    }
                    Err(err) => {
                        *conn = ConnectionState::Disconnected;
                        let _ = tx.send(Some(Err(err.to_string())));
                        Err(err)
                    }
                }
            }
        }
    }

    async fn spawn_and_handshake(&self) -> Result<Child, AgentClientError> {
        if which::which(&self.config.program).is_err() && !self.config.program.exists() {
            return Err(AgentClientError::BinaryNotFound(
                self.config.program.display().to_string(),
            ));
        }

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AgentClientError::Spawn)?;
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(pid = ?child.id(), "spawned agent process");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentClientError::Handshake("stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentClientError::Handshake("stdout not piped".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        tracing::debug!("agent stderr: {line}");
                    }
                }
            });
        }

        // Writer task: single serialising owner of stdin.
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });
        *self
            .shared
            .writer_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(writer_tx);

        tokio::spawn(reader_loop(Arc::clone(&self.shared), stdout));

        // Handshake with its own deadline; a wedged agent must not hang
        // connect forever.
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_name: "sprint-runner".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            supports_permission_requests: true,
        };
        let handshake = self.request_inner(METHOD_INITIALIZE, serde_json::to_value(params)?);
        let value = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                let _ = child.start_kill();
                return Err(AgentClientError::Handshake(err.to_string()));
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(AgentClientError::Handshake("handshake timed out".to_string()));
            }
        };

        let init: InitializeResult = serde_json::from_value(value)?;
        if init.protocol_version != PROTOCOL_VERSION {
            let _ = child.start_kill();
            return Err(AgentClientError::Handshake(format!(
                "protocol version mismatch: agent={}, client={}",
                init.protocol_version, PROTOCOL_VERSION
            )));
        }

        Ok(child)
    }

    /// Tear the process down. Waits for any in-flight connect to settle
    /// first, then closes stdin, waits briefly for a clean exit, and kills
    /// the child if it lingers. Every pending prompt is rejected.
    pub async fn disconnect(&self) -> Result<(), AgentClientError> {
        loop {
            let waiter = {
                let conn = self.conn.lock().await;
                match &*conn {
                    ConnectionState::Connecting(rx) => Some(rx.clone()),
                    _ => None,
                }
            };
            let Some(mut rx) = waiter else { break };
            let settled = rx.borrow().clone().is_some();
            if !settled && rx.changed().await.is_err() {
                break;
            }
            if rx.borrow().clone().is_some() {
                break;
            }
        }

        let child = {
            let mut conn = self.conn.lock().await;
            match std::mem::replace(&mut *conn, ConnectionState::Disconnected) {
                ConnectionState::Connected { child } => Some(child),
                _ => None,
            }
        };

        self.shared.connected.store(false, Ordering::SeqCst);
        // Dropping the writer closes stdin; a well-behaved agent exits on EOF.
        *self
            .shared
            .writer_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;

        if let Some(mut child) = child {
            match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("agent did not exit in time; killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        self.shared.fail_all_pending();
        self.shared.registry.mark_all_ended();
        Ok(())
    }

    // ── Requests ─────────────────────────────────────────────────────────

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AgentClientError> {
        if !self.is_connected() {
            return Err(AgentClientError::NotConnected);
        }
        self.request_inner(method, params).await
    }

    async fn request_inner(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AgentClientError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let line = serde_json::to_string(&RawMessage::request(id, method, params))?;
        if let Err(err) = self.shared.send_line(line) {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(result) => result,
            // Sender dropped without a response: the pending map was drained.
            Err(_) => Err(AgentClientError::ProcessExited),
        }
    }

    // ── Session commands ─────────────────────────────────────────────────

    /// Open a new session rooted at `cwd` with the given tool servers.
    pub async fn create_session(
        &self,
        role: AgentRole,
        cwd: &Path,
        mcp_servers: Vec<McpServerConfig>,
        issue_number: Option<u32>,
    ) -> Result<NewSessionResult, AgentClientError> {
        let params = NewSessionParams {
            cwd: cwd.display().to_string(),
            mcp_servers,
        };
        let value = self
            .request(METHOD_SESSION_NEW, serde_json::to_value(params)?)
            .await?;
        let info: NewSessionResult = serde_json::from_value(value)?;

        self.shared.registry.insert(
            &info.session_id,
            role,
            issue_number,
            info.current_model.clone(),
        );
        self.shared.bus.emit(SprintEvent::SessionStart {
            session_id: info.session_id.clone(),
            role,
            issue_number,
            model: info.current_model.clone(),
        });
        Ok(info)
    }

    /// Release agent-side session state. The session is marked ended
    /// locally even when the request fails.
    pub async fn end_session(&self, session_id: &str) -> Result<(), AgentClientError> {
        let params = EndSessionParams {
            session_id: session_id.to_string(),
        };
        let result = self
            .request(METHOD_SESSION_END, serde_json::to_value(params)?)
            .await;

        self.shared.registry.mark_ended(session_id);
        self.prompt_locks.lock().await.remove(session_id);
        self.shared.bus.emit(SprintEvent::SessionEnd {
            session_id: session_id.to_string(),
        });
        result.map(|_| ())
    }

    pub async fn set_mode(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> Result<(), AgentClientError> {
        let params = SetModeParams {
            session_id: session_id.to_string(),
            mode,
        };
        self.request(METHOD_SESSION_SET_MODE, serde_json::to_value(params)?)
            .await
            .map(|_| ())
    }

    pub async fn set_model(
        &self,
        session_id: &str,
        model: &str,
    ) -> Result<(), AgentClientError> {
        let params = SetModelParams {
            session_id: session_id.to_string(),
            model: model.to_string(),
        };
        self.request(METHOD_SESSION_SET_MODEL, serde_json::to_value(params)?)
            .await?;
        self.shared.registry.set_model(session_id, model);
        Ok(())
    }

    /// Send one prompt and wait for the turn to finish.
    ///
    /// The deadline rejects the caller with [`AgentClientError::Timeout`]
    /// but does not abort the agent; a late response is dropped.
    pub async fn send_prompt(
        &self,
        session_id: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<PromptResult, AgentClientError> {
        let lock = {
            let mut locks = self.prompt_locks.lock().await;
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        let _serialised = lock.lock().await;

        let params = PromptParams {
            session_id: session_id.to_string(),
            text: text.to_string(),
        };
        let fut = self.request(METHOD_SESSION_PROMPT, serde_json::to_value(params)?);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => Ok(serde_json::from_value(result?)?),
            Err(_) => Err(AgentClientError::Timeout),
        }
    }

    /// Snapshot of the last `last_n` output chunks for a session.
    pub fn session_output(&self, session_id: &str, last_n: usize) -> Vec<String> {
        self.shared.registry.output_tail(session_id, last_n)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry.snapshot()
    }
}

/// Demultiplex framed stdout until EOF, then reject all pending requests.
async fn reader_loop(shared: Arc<Shared>, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message: RawMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!("dropping malformed agent message: {err}");
                continue;
            }
        };
        handle_message(&shared, message);
    }

    tracing::info!("agent stdout closed");
    shared.connected.store(false, Ordering::SeqCst);
    *shared.writer_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
    shared.fail_all_pending();
}

fn handle_message(shared: &Arc<Shared>, message: RawMessage) {
    match message.kind() {
        MessageKind::Response { id } => {
            let sender = shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            let Some(sender) = sender else {
                // Late response after a timeout; nothing is waiting.
                tracing::debug!(id, "response for unknown request id");
                return;
            };
            let result = match message.error {
                Some(err) => Err(AgentClientError::Agent {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(message.result.unwrap_or(serde_json::Value::Null)),
            };
            let _ = sender.send(result);
        }
        MessageKind::Notification { method } if method == METHOD_SESSION_UPDATE => {
            let Some(params) = message.params else { return };
            match serde_json::from_value::<SessionUpdateParams>(params) {
                Ok(update) => {
                    shared.registry.append_output(&update.session_id, &update.text);
                    shared.bus.emit(SprintEvent::WorkerOutput {
                        session_id: update.session_id,
                        text: update.text,
                    });
                }
                Err(err) => tracing::debug!("bad session/update payload: {err}"),
            }
        }
        MessageKind::Notification { method } => {
            tracing::debug!(method, "ignoring unknown notification");
        }
        MessageKind::IncomingRequest { id, method } if method == METHOD_REQUEST_PERMISSION => {
            let outcome = message
                .params
                .and_then(|params| {
                    serde_json::from_value::<PermissionRequestParams>(params).ok()
                })
                .map(|request| {
                    shared
                        .permissions
                        .resolve(&request.tool_name, &request.options)
                })
                .unwrap_or(sprint_protocol::wire::PermissionOutcome::Cancelled);

            match serde_json::to_string(&RawMessage::response(
                id,
                serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null),
            )) {
                Ok(line) => {
                    if shared.send_line(line).is_err() {
                        tracing::debug!("could not answer permission request; agent gone");
                    }
                }
                Err(err) => tracing::warn!("failed to encode permission response: {err}"),
            }
        }
        MessageKind::IncomingRequest { id, method } => {
            tracing::debug!(id, method, "rejecting unknown agent request");
            let _ = shared.send_line(
                serde_json::to_string(&RawMessage::response(id, serde_json::Value::Null))
                    .unwrap_or_default(),
            );
        }
        MessageKind::Malformed => {
            tracing::debug!("dropping message with neither id nor method");
        }
    }
}
