//! Network session: an HTTP tool host probed over an event-stream endpoint.
//!
//! The base address is probed once with `Accept: text/event-stream`; tool
//! listing and invocation then go to `{origin}/tools` and
//! `{origin}/tools/call`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Url;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::protocol::{CallToolResult, ListToolsResult, ToolDescriptor};
use super::session::{Session, SessionStatus, StatusCell};
use crate::error::AgentError;
use crate::util::timeout::cancellable;

const EVENT_STREAM_TYPES: [&str; 3] = ["text/event-stream", "application/x-ndjson", "text/plain"];

/// Session backed by HTTP requests against a remote tool host.
pub struct HttpSession {
    server_id: String,
    base_url: Url,
    origin: String,
    client: reqwest::Client,
    status: StatusCell,
}

impl HttpSession {
    pub fn new(server_id: impl Into<String>, base_url: &str) -> Result<Self, AgentError> {
        let server_id = server_id.into();
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentError::connect(&server_id, format!("invalid url '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AgentError::connect(
                &server_id,
                format!("unsupported url scheme '{}'", base_url.scheme()),
            ));
        }
        let origin = base_url.origin().ascii_serialization();
        let client = reqwest::Client::builder().pool_max_idle_per_host(4).build()?;
        Ok(Self {
            server_id,
            base_url,
            origin,
            client,
            status: StatusCell::new(),
        })
    }

    pub fn tools_url(&self) -> String {
        format!("{}/tools", self.origin)
    }

    pub fn call_url(&self) -> String {
        format!("{}/tools/call", self.origin)
    }

    fn transport_error(&self, e: reqwest::Error) -> AgentError {
        AgentError::Transport(format!("{}: {e}", self.server_id))
    }
}

#[async_trait]
impl Session for HttpSession {
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

        let probe = self
            .client
            .get(self.base_url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();
        // Only the headers matter; the event stream body is never read.
        let resp = match tokio::time::timeout(deadline, probe).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(AgentError::connect(&self.server_id, e.to_string())),
            Err(_) => {
                return Err(AgentError::connect(
                    &self.server_id,
                    format!("probe timed out after {}ms", deadline.as_millis()),
                ))
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::connect(
                &self.server_id,
                format!("probe returned status {}", status.as_u16()),
            ));
        }

        if let Some(content_type) = resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            let essence = content_type.split(';').next().unwrap_or("").trim();
            if !EVENT_STREAM_TYPES.contains(&essence) {
                tracing::warn!(
                    server = %self.server_id,
                    content_type,
                    "probe returned a non event-stream content type"
                );
            }
        }
        drop(resp);

        if !self.status.mark_ready() {
            return Err(AgentError::connect(&self.server_id, "session closed during initialization"));
        }
        tracing::info!(server = %self.server_id, url = %self.base_url, "network session initialized");
        Ok(())
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, AgentError> {
        self.status.ensure_ready(&self.server_id)?;
        cancellable(cancel, async {
            let resp = self
                .client
                .get(self.tools_url())
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| self.transport_error(e))?;
            if !status.is_success() {
                return Err(AgentError::Protocol(format!(
                    "tool listing returned status {}: {body}",
                    status.as_u16()
                )));
            }
            let result: ListToolsResult = serde_json::from_str(&body)
                .map_err(|e| AgentError::Protocol(format!("malformed tool listing: {e}")))?;
            tracing::info!(server = %self.server_id, tool_count = result.tools.len(), "listed tools");
            Ok(result.tools)
        })
        .await
    }

    async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, AgentError> {
        self.status.ensure_ready(&self.server_id)?;
        cancellable(cancel, async {
            let resp = self
                .client
                .post(self.call_url())
                .json(&json!({ "tool": name, "arguments": arguments }))
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| self.transport_error(e))?;
            if !status.is_success() {
                return Err(AgentError::tool(
                    name,
                    format!("status {}: {body}", status.as_u16()),
                ));
            }
            let result: CallToolResult = serde_json::from_str(&body)
                .map_err(|e| AgentError::Protocol(format!("malformed tool result: {e}")))?;
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
        })
        .await
    }

    async fn close(&self) -> Result<(), AgentError> {
        if self.status.mark_closed() {
            tracing::info!(server = %self.server_id, url = %self.base_url, "network session closed");
        }
        Ok(())
    }
}
