//! Lifecycle of one tool-provider subprocess.
//!
//! A [`ToolSession`] spawns a validated provider, performs the MCP
//! `initialize` handshake, snapshots the advertised tools into a
//! [`Catalog`], and then forwards `tools/call` requests until it is closed.
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Closed
//!                     |                    ^
//!                     +--------------------+  (handshake failure)
//! ```
//!
//! Teardown happens exactly once on every exit path: an explicit
//! [`ToolSession::close`], a connection failure during a request, or the
//! session being dropped (for example when a turn is cancelled). The child is
//! additionally spawned with `kill_on_drop` so it cannot outlive the handle.

mod launch;
mod transport;

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use crate::catalog::{Catalog, ToolDescriptor};

pub use launch::{LaunchError, LaunchKind, ProviderLaunch};
use transport::RpcChannel;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long `close` waits for the provider to exit after its input closes.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Target used for forwarded provider stderr.
const PROVIDER_LOG_TARGET: &str = "toolbridge::provider";

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No process yet
    Disconnected,
    /// Process spawned, handshake in progress
    Connecting,
    /// Catalog cached, calls accepted
    Ready,
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Errors raised by a tool session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The provider process could not be started
    #[error("failed to start provider: {0}")]
    Spawn(#[source] std::io::Error),
    /// Reading from or writing to the provider failed
    #[error("provider transport failed: {0}")]
    Transport(#[source] std::io::Error),
    /// The provider closed its output or the session was already torn down
    #[error("provider connection closed")]
    Closed,
    /// The provider did not answer in time
    #[error("provider did not answer {operation} within {after:?}")]
    Timeout {
        /// The request that timed out
        operation: String,
        /// The configured limit
        after: Duration,
    },
    /// The provider broke the framing or sent an unexpected shape
    #[error("provider protocol error: {0}")]
    Protocol(String),
    /// The provider answered with a JSON-RPC error
    #[error("provider rejected request ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },
    /// The tool is not in the cached catalog
    #[error("Tool '{0}' not found in available tools")]
    UnknownTool(String),
    /// The session is not in the Ready state
    #[error("session is {0}, not ready")]
    NotReady(SessionState),
}

impl SessionError {
    /// Whether the provider is unreachable, as opposed to a rejected call.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SessionError::Spawn(_)
                | SessionError::Transport(_)
                | SessionError::Closed
                | SessionError::Timeout { .. }
                | SessionError::Protocol(_)
                | SessionError::NotReady(_)
        )
    }
}

/// Text result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text content blocks joined by newlines
    pub text: String,
    /// Whether the provider flagged the result as an error
    pub is_error: bool,
}

impl ToolOutput {
    fn from_call_result(result: &Value) -> Self {
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Self {
            text,
            is_error: result.get("isError").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Something that can list and invoke tools.
///
/// [`ToolSession`] is the production implementation; the conversation layer
/// only depends on this trait.
#[async_trait]
pub trait ToolInvoker: Send {
    /// Tools advertised at connection time.
    fn catalog(&self) -> &Catalog;

    /// Invoke a tool by exact name.
    async fn invoke(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, SessionError>;
}

/// A connection to one provider subprocess.
pub struct ToolSession {
    state: SessionState,
    child: Option<Child>,
    channel: Option<RpcChannel<ChildStdin, ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    catalog: Catalog,
    server_name: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSession")
            .field("state", &self.state)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("tools", &self.catalog.names())
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolSession {
    /// Spawn the provider, run the handshake and cache its catalog.
    ///
    /// Every request round-trip is bounded by `timeout`. On any failure the
    /// child is killed before the error is returned.
    pub async fn connect(launch: &ProviderLaunch, timeout: Duration) -> Result<Self, SessionError> {
        let mut session = Self {
            state: SessionState::Disconnected,
            child: None,
            channel: None,
            stderr_task: None,
            catalog: Catalog::default(),
            server_name: None,
            timeout,
        };

        session.state = SessionState::Connecting;
        let mut command = launch.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SessionError::Spawn)?;
        tracing::info!(
            provider = %launch.script().display(),
            pid = ?child.id(),
            "provider started"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        session.child = Some(child);

        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            session.teardown();
            return Err(SessionError::Protocol("provider stdio was not captured".into()));
        };
        session.channel = Some(RpcChannel::new(stdin, stdout));
        session.stderr_task = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: PROVIDER_LOG_TARGET, "{line}");
                }
            })
        });

        if let Err(e) = session.handshake().await {
            tracing::warn!(error = %e, "provider handshake failed");
            session.teardown();
            return Err(e);
        }

        session.state = SessionState::Ready;
        tracing::info!(
            server = session.server_name.as_deref().unwrap_or("unknown"),
            tools = ?session.catalog.names(),
            "provider ready"
        );
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let init = self
            .round_trip(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        self.server_name = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let channel = self.channel.as_mut().ok_or(SessionError::Closed)?;
        channel.notify("notifications/initialized", json!({})).await?;

        let mut tools: Vec<ToolDescriptor> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let mut page = self.round_trip("tools/list", params).await?;
            let raw = page.get_mut("tools").map(Value::take).unwrap_or(Value::Null);
            let listed: Vec<ToolDescriptor> = serde_json::from_value(raw)
                .map_err(|e| SessionError::Protocol(format!("invalid tool listing: {e}")))?;
            tools.extend(listed);

            let next = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if next.is_none() || next == cursor {
                break;
            }
            cursor = next;
        }

        self.catalog = Catalog::new(tools);
        Ok(())
    }

    /// One bounded request. Connection failures and timeouts tear the
    /// session down.
    async fn round_trip(&mut self, method: &str, params: Value) -> Result<Value, SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotReady(self.state))?;
        let outcome = tokio::time::timeout(self.timeout, channel.request(method, params)).await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_error() {
                    self.teardown();
                }
                Err(e)
            }
            Err(_) => {
                self.teardown();
                Err(SessionError::Timeout {
                    operation: method.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name the provider reported in its handshake, if any.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Close the provider's input, wait briefly for it to exit, then kill it.
    pub async fn close(mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if let Some(mut channel) = self.channel.take() {
            channel.close_input();
        }
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "provider exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for provider"),
                Err(_) => {
                    tracing::debug!("provider did not exit after input closed; killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill provider");
                    }
                }
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        tracing::info!("provider session closed");
    }

    /// Immediate, synchronous teardown. Runs at most once.
    fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.channel = None;
        if let Some(child) = self.child.as_mut()
            && let Err(e) = child.start_kill()
        {
            tracing::debug!(error = %e, "provider already gone");
        }
        tracing::debug!("provider session torn down");
    }
}

#[async_trait]
impl ToolInvoker for ToolSession {
    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady(self.state));
        }
        if !self.catalog.contains(name) {
            return Err(SessionError::UnknownTool(name.to_string()));
        }

        tracing::debug!(tool = name, "invoking tool");
        let result = self
            .round_trip("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let output = ToolOutput::from_call_result(&result);
        tracing::debug!(tool = name, is_error = output.is_error, "tool returned");
        Ok(output)
    }
}

impl Drop for ToolSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
