//! Chat model abstraction used by the agent loop.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::types::{GenerationSettings, Message, ToolDefinition};

#[cfg(feature = "openai")]
pub mod openai;
pub mod scripted;

#[cfg(feature = "openai")]
pub use openai::OpenAiChatModel;
pub use scripted::ScriptedModel;

/// One request to a chat model.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub settings: GenerationSettings,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// A language model that answers with text, tool calls, or both.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Produce one assistant message for `request`.
    async fn generate(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, AgentError>;

    /// Stream text deltas for `request`. Tool calls are not surfaced.
    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<String, AgentError>>, AgentError> {
        let message = self.generate(request, cancel).await?;
        let text = message.text().to_string();
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}
