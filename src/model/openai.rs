//! OpenAI-compatible Chat Completions client.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChatModel, ModelRequest};
use crate::error::AgentError;
use crate::types::{Message, Role, ToolCall};
use crate::util::timeout::cancellable;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatModel {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    pub(crate) fn build_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model.clone().into());
        body.insert("messages".into(), messages.into());
        body.insert("stream".into(), stream.into());

        if let Some(max) = request.settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if !request.tools.is_empty() {
            let tool_defs: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), tool_defs.into());
            body.insert("tool_choice".into(), "auto".into());
        }
        Value::Object(body)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .client
            .post(self.url())
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Model {
                status,
                message: error_message(&body_text),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, AgentError> {
        let body = self.build_request_body(request, false);
        debug!(model = %self.model, messages = request.messages.len(), "chat completion");

        cancellable(cancel, async {
            let resp = self.post(&body).await?;
            let data: ChatResponse = resp.json().await?;
            let choice = data.choices.into_iter().next().ok_or_else(|| AgentError::Model {
                status: 200,
                message: "response contained no choices".into(),
            })?;
            if let Some(usage) = data.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "token usage"
                );
            }
            let tool_calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                .collect();
            Ok(Message::assistant_with_tools(choice.message.content, tool_calls))
        })
        .await
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<String, AgentError>>, AgentError> {
        let body = self.build_request_body(request, true);
        debug!(model = %self.model, "streaming chat completion");

        let resp = cancellable(cancel, self.post(&body)).await?;
        let byte_stream = resp.bytes_stream();
        let cancel = cancel.clone();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            futures::pin_mut!(byte_stream);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = byte_stream.next() => Some(next),
                };
                let Some(next) = next else {
                    yield Err(AgentError::Cancelled);
                    break;
                };
                let Some(chunk_result) = next else { break };
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AgentError::Network(e));
                        break;
                    }
                };

                lines.extend(&chunk);

                while let Some(line) = lines.next_line() {
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else { continue };
                    // Keep-alive or vendor frames that do not parse are skipped.
                    if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                        if let Some(text) = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                            .filter(|t| !t.is_empty())
                        {
                            yield Ok(text);
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Accumulates raw body bytes and yields complete lines.
///
/// Lines are decoded only once their `\n` arrives, so a multi-byte
/// character split across network chunks is reassembled intact.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete line, trimmed, or `None` until more bytes arrive.
    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Parse an SSE `data:` line, returning `None` for `[DONE]`.
fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn message_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.text(),
        }),
        Role::Assistant if msg.has_tool_calls() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments },
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": calls,
            })
        }
        role => match &msg.attachment {
            Some(image) => json!({
                "role": role.to_string(),
                "content": [
                    { "type": "text", "text": msg.text() },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{}", image.mime_type, image.data) }
                    }
                ],
            }),
            None => json!({ "role": role.to_string(), "content": msg.text() }),
        },
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<UsageBlock>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct UsageBlock {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
