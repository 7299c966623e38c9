//! Subprocess session: a child process speaking JSON-RPC over its standard
//! input and output.

use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{CallToolResult, ListToolsResult, ToolDescriptor, PROTOCOL_VERSION};
use super::rpc::RpcChannel;
use super::session::{Session, SessionStatus, StatusCell, DEFAULT_SHUTDOWN_GRACE};
use crate::error::AgentError;
use crate::util::timeout::with_timeout;

/// How long `close` lets the stderr drain finish after the child exits.
const STDERR_FLUSH: Duration = Duration::from_millis(250);
/// Most recent stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

type StderrTail = Arc<StdMutex<VecDeque<String>>>;

/// Session backed by a spawned child process.
pub struct StdioSession {
    server_id: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    shutdown_grace: Duration,
    status: StatusCell,
    channel: OnceLock<RpcChannel>,
    child: Mutex<Option<Child>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    drain: StdMutex<Option<JoinHandle<()>>>,
    stderr_tail: StderrTail,
}

impl StdioSession {
    pub fn new(server_id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            server_id: server_id.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            status: StatusCell::new(),
            channel: OnceLock::new(),
            child: Mutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            drain: StdMutex::new(None),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    /// Extra environment variables for the child.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// How long `close` waits for a natural exit before killing the child.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Last non-empty lines the child wrote to stderr, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn channel(&self) -> Result<&RpcChannel, AgentError> {
        self.status.ensure_ready(&self.server_id)?;
        self.channel.get().ok_or_else(|| {
            AgentError::InvalidState(format!("session '{}' has no channel", self.server_id))
        })
    }

    fn spawn(&self) -> Result<(), AgentError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::connect(&self.server_id, format!("failed to spawn `{}`: {e}", self.command))
            })?;

        let missing = |stream: &str| {
            AgentError::connect(&self.server_id, format!("child {stream} was not captured"))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let channel = RpcChannel::new(self.server_id.clone(), stdin);
        let reader = channel.spawn_reader(stdout);
        let drain = tokio::spawn(drain_stderr(
            self.server_id.clone(),
            stderr,
            Arc::clone(&self.stderr_tail),
        ));
        if self.channel.set(channel).is_err() {
            return Err(AgentError::InvalidState(format!(
                "session '{}' was already initialized",
                self.server_id
            )));
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(reader);
        }
        if let Ok(mut slot) = self.drain.lock() {
            *slot = Some(drain);
        }
        // `try_lock` cannot fail: nothing else touches the child before `Ready`.
        if let Ok(mut slot) = self.child.try_lock() {
            *slot = Some(child);
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<(), AgentError> {
        let channel = self.channel.get().ok_or_else(|| {
            AgentError::InvalidState(format!("session '{}' has no channel", self.server_id))
        })?;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let reply = channel
            .request("initialize", Some(params), &CancellationToken::new())
            .await?;
        let info = reply.map_err(|e| AgentError::Protocol(format!("initialize rejected: {e}")))?;
        if let Some(version) = info.get("protocolVersion").and_then(Value::as_str) {
            if version != PROTOCOL_VERSION {
                tracing::debug!(server = %self.server_id, version, "server negotiated a different protocol version");
            }
        }
        channel.notify("notifications/initialized", None).await
    }
}

#[async_trait]
impl Session for StdioSession {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn status(&self) -> SessionStatus {
        self.status.get()
    }

    async fn initialize(&self, deadline: Duration) -> Result<(), AgentError> {
        if self.status.get() != SessionStatus::Uninitialized {
            return Err(AgentError::InvalidState(format!(
                "session '{}' cannot be initialized twice",
                self.server_id
            )));
        }

        self.spawn()?;
        if let Err(e) = with_timeout(deadline, self.handshake()).await {
            if let Err(close_err) = self.close().await {
                tracing::warn!(server = %self.server_id, error = %close_err, "cleanup after failed handshake");
            }
            return Err(match e {
                AgentError::Connect { .. } => e,
                other => AgentError::connect(&self.server_id, format!("handshake failed: {other}")),
            });
        }

        if !self.status.mark_ready() {
            return Err(AgentError::connect(&self.server_id, "session closed during initialization"));
        }
        tracing::info!(
            server = %self.server_id,
            command = %self.command,
            args = ?self.args,
            "stdio session initialized"
        );
        Ok(())
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, AgentError> {
        let channel = self.channel()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let reply = channel.request("tools/list", Some(params), cancel).await?;
            let value = reply.map_err(|e| AgentError::Protocol(format!("tools/list rejected: {e}")))?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| AgentError::Protocol(format!("malformed tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }
        tracing::info!(server = %self.server_id, tool_count = tools.len(), "listed tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, AgentError> {
        let channel = self.channel()?;
        let params = json!({ "name": name, "arguments": arguments });
        let reply = channel.request("tools/call", Some(params), cancel).await?;
        let value = reply.map_err(|e| AgentError::tool(name, e.message))?;
        let result: CallToolResult = serde_json::from_value(value)
            .map_err(|e| AgentError::Protocol(format!("malformed tools/call result: {e}")))?;
        if result.is_error {
            let message = result.joined_text();
            return Err(AgentError::tool(
                name,
                if message.is_empty() {
                    "remote tool reported an error".to_string()
                } else {
                    message
                },
            ));
        }
        tracing::debug!(server = %self.server_id, tool = name, "tool call succeeded");
        Ok(result)
    }

    async fn close(&self) -> Result<(), AgentError> {
        if !self.status.mark_closed() {
            return Ok(());
        }

        if let Some(channel) = self.channel.get() {
            channel.close_writer().await;
        }

        let mut outcome = Ok(());
        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server_id, %status, "child exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %self.server_id, error = %e, "error waiting for child");
                }
                Err(_) => {
                    tracing::warn!(
                        server = %self.server_id,
                        grace_ms = self.shutdown_grace.as_millis() as u64,
                        "child did not exit in time; killing"
                    );
                    if let Err(e) = child.kill().await {
                        outcome = Err(AgentError::Transport(format!(
                            "{}: failed to kill child: {e}",
                            self.server_id
                        )));
                    }
                }
            }
        }

        if let Some(channel) = self.channel.get() {
            channel.fail_pending("session closed");
        }
        let drain = self.drain.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut drain) = drain {
            // Descendants of the child can keep the pipe open past its exit.
            if tokio::time::timeout(STDERR_FLUSH, &mut drain).await.is_err() {
                drain.abort();
            }
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        tracing::info!(server = %self.server_id, command = %self.command, "stdio session closed");
        outcome
    }
}

async fn drain_stderr(server_id: String, stderr: ChildStderr, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                tracing::warn!(server = %server_id, stderr = %line, "server stderr");
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "failed to read server stderr");
                break;
            }
        }
    }
}
