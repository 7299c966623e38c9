//! Deterministic model that replays queued replies. Used for offline runs and
//! tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatModel, ModelRequest};
use crate::error::AgentError;
use crate::types::{Message, ToolCall};

/// Replies with queued messages in order. Once the queue is empty it repeats
/// the fallback reply, or fails if none was set.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    fallback: Option<Message>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Reply used whenever the queue is exhausted.
    pub fn with_fallback(mut self, reply: Message) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn push(&self, reply: Message) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Assistant message requesting a single tool call.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
        Message::assistant_with_tools(None, vec![ToolCall::new(id, name, arguments.to_string())])
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| AgentError::InvalidState("scripted model lock poisoned".into()))?
            .pop_front();
        let mut reply = next
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| AgentError::InvalidState("scripted model has no replies left".into()))?;
        reply.timestamp = chrono::Utc::now();
        Ok(reply)
    }
}
