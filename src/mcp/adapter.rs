//! Bridge remote MCP tools into the local [`Tool`] contract.

use std::sync::Arc;

use async_trait::async_trait;

use super::protocol::{CallToolResult, ToolDescriptor};
use super::session::Session;
use crate::error::AgentError;
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

/// Observation used when a remote tool returns no text at all.
pub const NO_OUTPUT: &str = "Tool executed with no output";

/// A remote tool presented under a namespaced local name.
pub struct McpToolAdapter {
    local_name: String,
    server_id: String,
    descriptor: ToolDescriptor,
    parameters: ToolParameters,
    session: Arc<dyn Session>,
}

impl McpToolAdapter {
    pub fn new(local_name: impl Into<String>, descriptor: ToolDescriptor, session: Arc<dyn Session>) -> Self {
        Self {
            local_name: local_name.into(),
            server_id: session.server_id().to_string(),
            parameters: ToolParameters::from_schema(descriptor.input_schema.clone()),
            descriptor,
            session,
        }
    }

    /// Identity of the owning session.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Name the remote host knows this tool by.
    pub fn original_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.local_name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn required_parameters(&self) -> Vec<String> {
        self.descriptor.required()
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, AgentError> {
        let arguments = args.to_object()?;
        tracing::info!(
            tool = %self.descriptor.name,
            server = %self.server_id,
            "executing remote tool"
        );
        let result = self
            .session
            .call_tool(&ctx.cancel, &self.descriptor.name, arguments)
            .await
            .map_err(|e| {
                tracing::warn!(tool = %self.local_name, error = %e, "remote tool failed");
                e
            })?;
        Ok(serde_json::Value::String(flatten_result(&result)))
    }
}

impl std::fmt::Debug for McpToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolAdapter")
            .field("local_name", &self.local_name)
            .field("server_id", &self.server_id)
            .field("original_name", &self.descriptor.name)
            .finish()
    }
}

/// Join the text parts of a result; never returns an empty string.
pub fn flatten_result(result: &CallToolResult) -> String {
    let text = result.joined_text();
    if text.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ContentPart;

    #[test]
    fn single_text_part_flattens_verbatim() {
        assert_eq!(flatten_result(&CallToolResult::text("42")), "42");
    }

    #[test]
    fn empty_result_flattens_to_sentinel() {
        let empty = CallToolResult::default();
        assert_eq!(flatten_result(&empty), NO_OUTPUT);
        assert!(!flatten_result(&empty).is_empty());
    }

    #[test]
    fn non_text_parts_are_skipped() {
        let result = CallToolResult {
            content: vec![
                ContentPart::Image {
                    data: "AAAA".into(),
                    mime_type: "image/png".into(),
                },
                ContentPart::Text { text: "caption".into() },
            ],
            is_error: false,
        };
        assert_eq!(flatten_result(&result), "caption");

        let images_only = CallToolResult {
            content: vec![ContentPart::Unknown],
            is_error: false,
        };
        assert_eq!(flatten_result(&images_only), NO_OUTPUT);
    }
}
