//! Shared test helpers: in-memory sessions and a factory that hands them out.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mcp_agent::error::AgentError;
use mcp_agent::mcp::protocol::{CallToolResult, ToolDescriptor};
use mcp_agent::mcp::{Session, SessionFactory, SessionOptions, SessionStatus, TransportConfig};

/// How a [`MockSession`] answers `call_tool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallBehavior {
    /// Return the `text` argument (or the JSON arguments) as one text part.
    Echo,
    /// Return no content parts.
    Empty,
    /// Report a remote tool failure.
    Fail,
    /// Report a broken channel.
    BreakTransport,
    /// Wait until cancelled.
    Hang,
}

/// Scriptable in-memory session.
pub struct MockSession {
    id: String,
    tools: Vec<ToolDescriptor>,
    fail_initialize: bool,
    fail_list: bool,
    cancel_on_list: Option<CancellationToken>,
    behavior: CallBehavior,
    status: Mutex<SessionStatus>,
    close_count: AtomicUsize,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    call_started: Notify,
}

impl MockSession {
    pub fn new(id: &str, tool_names: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            tools: tool_names.iter().map(|name| descriptor(name)).collect(),
            fail_initialize: false,
            fail_list: false,
            cancel_on_list: None,
            behavior: CallBehavior::Echo,
            status: Mutex::new(SessionStatus::Uninitialized),
            close_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            call_started: Notify::new(),
        }
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// Cancel `token` while answering `tools/list`, after which the listing
    /// still succeeds.
    pub fn cancel_on_list(mut self, token: CancellationToken) -> Self {
        self.cancel_on_list = Some(token);
        self
    }

    pub fn with_behavior(mut self, behavior: CallBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Resolves once a call has started (useful with [`CallBehavior::Hang`]).
    pub async fn wait_for_call(&self) {
        self.call_started.notified().await;
    }
}

pub fn descriptor(name: &str) -> ToolDescriptor {
    serde_json::from_value(json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        },
    }))
    .unwrap()
}

#[async_trait]
impl Session for MockSession {
    fn server_id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    async fn initialize(&self, _deadline: Duration) -> Result<(), AgentError> {
        if self.fail_initialize {
            return Err(AgentError::connect(&self.id, "refused"));
        }
        *self.status.lock().unwrap() = SessionStatus::Ready;
        Ok(())
    }

    async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, AgentError> {
        if self.fail_list {
            return Err(AgentError::Protocol("garbled listing".into()));
        }
        if let Some(token) = &self.cancel_on_list {
            token.cancel();
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, AgentError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments.clone()));
        self.call_started.notify_one();
        match self.behavior {
            CallBehavior::Echo => {
                let text = arguments
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(arguments.clone()).to_string());
                Ok(CallToolResult::text(text))
            }
            CallBehavior::Empty => Ok(CallToolResult::default()),
            CallBehavior::Fail => Err(AgentError::tool(name, "remote failure")),
            CallBehavior::BreakTransport => Err(AgentError::Transport(format!("{}: pipe closed", self.id))),
            CallBehavior::Hang => {
                cancel.cancelled().await;
                Err(AgentError::Cancelled)
            }
        }
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap() = SessionStatus::Closed;
        Ok(())
    }
}

/// Factory handing out pre-built sessions by server id.
#[derive(Default)]
pub struct MockFactory {
    sessions: Mutex<HashMap<String, Arc<MockSession>>>,
    opened: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, session: MockSession) -> Self {
        self.insert(Arc::new(session));
        self
    }

    pub fn insert(&self, session: Arc<MockSession>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.server_id().to_string(), session);
    }

    pub fn get(&self, id: &str) -> Arc<MockSession> {
        Arc::clone(self.sessions.lock().unwrap().get(id).unwrap())
    }

    /// Server ids passed to `open`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl SessionFactory for MockFactory {
    fn open(
        &self,
        server_id: &str,
        _transport: &TransportConfig,
        _options: &SessionOptions,
    ) -> Result<Arc<dyn Session>, AgentError> {
        self.opened.lock().unwrap().push(server_id.to_string());
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(server_id)
            .cloned()
            .ok_or_else(|| AgentError::connect(server_id, "unknown server"))?;
        Ok(session as Arc<dyn Session>)
    }
}

/// Placeholder transport; the mock factory ignores it.
pub fn any_transport() -> TransportConfig {
    TransportConfig::stdio("mock", vec![])
}
