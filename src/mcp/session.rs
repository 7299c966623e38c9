//! The transport session contract shared by the subprocess and network
//! variants.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::http::HttpSession;
use super::protocol::{CallToolResult, ToolDescriptor};
use super::stdio::StdioSession;
use super::TransportConfig;
use crate::error::AgentError;

/// Default bound on establishing a channel and discovering its tools.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default wait for a child to exit on its own before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Ready,
    Closed,
}

/// One live channel to one tool host.
#[async_trait]
pub trait Session: Send + Sync {
    /// Server identity this session belongs to.
    fn server_id(&self) -> &str;

    fn status(&self) -> SessionStatus;

    /// Establish the channel within `deadline`.
    async fn initialize(&self, deadline: Duration) -> Result<(), AgentError>;

    /// Discover the tools the host exposes.
    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, AgentError>;

    /// Invoke one tool by its remote name.
    async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, AgentError>;

    /// Release the channel. Calling it again is a no-op.
    async fn close(&self) -> Result<(), AgentError>;
}

/// Timeouts applied to sessions created by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Builds an uninitialized session for a declared transport.
pub trait SessionFactory: Send + Sync {
    fn open(
        &self,
        server_id: &str,
        transport: &TransportConfig,
        options: &SessionOptions,
    ) -> Result<Arc<dyn Session>, AgentError>;
}

/// Factory for the built-in stdio and network sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionFactory;

impl SessionFactory for DefaultSessionFactory {
    fn open(
        &self,
        server_id: &str,
        transport: &TransportConfig,
        options: &SessionOptions,
    ) -> Result<Arc<dyn Session>, AgentError> {
        match transport {
            TransportConfig::Stdio { command, args, env } => Ok(Arc::new(
                StdioSession::new(server_id, command, args.clone())
                    .with_env(env.clone())
                    .with_shutdown_grace(options.shutdown_grace),
            )),
            TransportConfig::Network { url } => Ok(Arc::new(HttpSession::new(server_id, url)?)),
        }
    }
}

/// Atomic holder for a [`SessionStatus`].
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> SessionStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => SessionStatus::Uninitialized,
            1 => SessionStatus::Ready,
            _ => SessionStatus::Closed,
        }
    }

    /// Move from `Uninitialized` to `Ready`; fails if the session was closed
    /// in the meantime.
    pub(crate) fn mark_ready(&self) -> bool {
        self.0
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to `Closed`. Returns `true` only for the call that performed the
    /// transition.
    pub(crate) fn mark_closed(&self) -> bool {
        self.0.swap(2, Ordering::SeqCst) != 2
    }

    pub(crate) fn ensure_ready(&self, server_id: &str) -> Result<(), AgentError> {
        match self.get() {
            SessionStatus::Ready => Ok(()),
            SessionStatus::Uninitialized => Err(AgentError::InvalidState(format!(
                "session '{server_id}' is not initialized"
            ))),
            SessionStatus::Closed => Err(AgentError::Transport(format!(
                "session '{server_id}' is closed"
            ))),
        }
    }
}
