//! The step-bounded tool-using agent.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{RunEventEmitter, RunEventPayload, RunEventSink, RunLifecycle};
use super::limits::AgentLimits;
use super::memory::Memory;
use super::types::{AgentState, RunId, RunResult, RunStatus, ToolObservation};
use crate::error::AgentError;
use crate::history::{HistorySink, MessageRecord, TaskRecord, ToolCallRecord};
use crate::mcp::{ClientManager, NO_OUTPUT};
use crate::model::{ChatModel, ModelRequest};
use crate::tools::builtin::TERMINATE_TOOL;
use crate::tools::{validate_arguments, ToolArguments, ToolExecutionContext, ToolRegistry};
use crate::types::{GenerationSettings, Message, Role, ToolCall};
use crate::util::text::truncate_chars;
use crate::util::timeout::cancellable;

/// How the step loop ended, before it is folded into a [`RunResult`].
enum LoopExit {
    Completed(Option<String>),
    BudgetExhausted,
}

/// A tool-using agent bound to one model and one tool registry.
///
/// Each call to [`Agent::run`] starts a fresh run: step counter, duplicate
/// window and state are reset, while memory carries over.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    registry: ToolRegistry,
    owned_manager: Option<Arc<ClientManager>>,
    limits: AgentLimits,
    settings: GenerationSettings,
    system_prompt: Option<String>,
    next_step_prompt: Option<String>,
    completion_markers: Vec<String>,
    memory: Memory,
    state: AgentState,
    steps: usize,
    recent_replies: VecDeque<String>,
    conversation_id: String,
    history: Option<Arc<dyn HistorySink>>,
    event_sink: Option<RunEventSink>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, registry: ToolRegistry) -> Self {
        let limits = AgentLimits::default();
        Self {
            model,
            registry,
            owned_manager: None,
            memory: Memory::new(limits.memory_capacity),
            limits,
            settings: GenerationSettings::default(),
            system_prompt: None,
            next_step_prompt: None,
            completion_markers: Vec::new(),
            state: AgentState::Idle,
            steps: 0,
            recent_replies: VecDeque::new(),
            conversation_id: Uuid::new_v4().to_string(),
            history: None,
            event_sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the limits. Memory is rebuilt at the new capacity, keeping the
    /// newest entries.
    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        let mut memory = Memory::new(limits.memory_capacity);
        for message in self.memory.iter() {
            memory.push(message.clone());
        }
        self.memory = memory;
        self.limits = limits;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.next_step_prompt = Some(prompt.into());
        self
    }

    /// Opt in to free-text completion: a reply containing any marker
    /// (case-insensitive) ends the run successfully.
    pub fn with_completion_markers(mut self, markers: Vec<String>) -> Self {
        self.completion_markers = markers
            .into_iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Hand the agent a manager whose sessions it must close when a run ends.
    pub fn with_owned_manager(mut self, manager: Arc<ClientManager>) -> Self {
        self.registry.attach(Arc::clone(&manager));
        self.owned_manager = Some(manager);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_event_sink(mut self, sink: RunEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = id.into();
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The agent's own cancellation signal, independent of any caller token.
    ///
    /// Cancelling it is permanent: the current run stops and every later run
    /// ends as cancelled before its first model call.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `task` to completion under a fresh run id.
    pub async fn run(&mut self, ctx: &CancellationToken, task: &str) -> RunResult {
        self.run_as(Uuid::new_v4(), ctx, task).await
    }

    pub(crate) async fn run_as(&mut self, run_id: RunId, ctx: &CancellationToken, task: &str) -> RunResult {
        if self.state == AgentState::Running {
            return RunResult::failed(run_id, "agent is already running");
        }
        let started_at = Utc::now();
        let emitter = RunEventEmitter::new(run_id, self.event_sink.clone());
        tracing::info!(run_id = %run_id, model = self.model.model_id(), "run started");
        emitter.emit(RunEventPayload::Lifecycle {
            state: RunLifecycle::Started,
        });

        self.state = AgentState::Running;
        self.steps = 0;
        self.recent_replies.clear();

        if self.memory.is_empty() {
            if let Some(prompt) = self.system_prompt.clone() {
                self.remember(Message::system(prompt)).await;
            }
        }
        self.remember(Message::user(task)).await;

        // Either the caller's token or the agent's own signal cancels the run.
        let token = ctx.child_token();
        if self.cancel.is_cancelled() {
            token.cancel();
        }
        let link = {
            let own = self.cancel.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = own.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        };

        let exit = self.drive(&token, &emitter).await;
        link.abort();

        if let Some(manager) = self.owned_manager.take() {
            if let Err(e) = manager.close().await {
                tracing::warn!(run_id = %run_id, error = %e, "failed to close sessions after run");
            }
        }

        let result = match exit {
            Ok(LoopExit::Completed(output)) => {
                tracing::info!(run_id = %run_id, steps = self.steps, "run completed");
                RunResult::new(run_id, RunStatus::Completed, self.steps).with_output(output)
            }
            Ok(LoopExit::BudgetExhausted) => {
                tracing::warn!(
                    run_id = %run_id,
                    max_steps = self.limits.max_steps,
                    "step budget exhausted before the task completed"
                );
                RunResult::new(run_id, RunStatus::BudgetExhausted, self.steps)
                    .with_output(self.memory.last_assistant_text().map(str::to_string))
            }
            Err(e) => {
                let status = match &e {
                    AgentError::Cancelled => RunStatus::Cancelled,
                    AgentError::StuckLoop { .. } => RunStatus::StuckLoop,
                    _ => RunStatus::Failed,
                };
                tracing::warn!(run_id = %run_id, status = %status, error = %e, "run ended early");
                RunResult::new(run_id, status, self.steps)
                    .with_output(self.memory.last_assistant_text().map(str::to_string))
                    .with_error(e.to_string())
            }
        };

        self.state = match result.status {
            RunStatus::Completed | RunStatus::BudgetExhausted => AgentState::Finished,
            _ => AgentState::Error,
        };

        if let Some(history) = &self.history {
            let record = TaskRecord {
                id: run_id,
                conversation_id: self.conversation_id.clone(),
                prompt: task.to_string(),
                status: result.status,
                output: result.output.clone(),
                error: result.error.clone(),
                steps: result.steps,
                started_at,
                finished_at: result.finished_at,
            };
            if let Err(e) = history.append_task(record).await {
                tracing::warn!(run_id = %run_id, error = %e, "failed to record task");
            }
        }

        emitter.emit(RunEventPayload::Lifecycle {
            state: RunLifecycle::Finished {
                status: result.status,
                error: result.error.clone(),
            },
        });
        result
    }

    async fn drive(
        &mut self,
        token: &CancellationToken,
        emitter: &RunEventEmitter,
    ) -> Result<LoopExit, AgentError> {
        loop {
            self.ensure_not_cancelled(token)?;
            if self.steps >= self.limits.max_steps {
                return Ok(LoopExit::BudgetExhausted);
            }
            self.steps += 1;
            tracing::debug!(step = self.steps, max_steps = self.limits.max_steps, "step started");
            emitter.emit(RunEventPayload::StepStarted { step: self.steps });

            let request = self.build_request().await;
            let reply = cancellable(token, self.model.generate(&request, token)).await?;
            let text = reply.text().trim().to_string();
            let calls = reply.tool_calls.clone();
            self.remember(reply).await;
            emitter.emit(RunEventPayload::AssistantMessage {
                text: text.clone(),
                tool_calls: calls.clone(),
            });

            let mut completion: Option<Option<String>> = None;
            for call in &calls {
                self.ensure_not_cancelled(token)?;
                emitter.emit(RunEventPayload::ToolCallStarted { call: call.clone() });
                let (observation, terminate_message) = self.execute_call(call, token).await?;
                self.remember(Message::tool_result(
                    &observation.tool_call_id,
                    &observation.tool_name,
                    observation.content.clone(),
                ))
                .await;
                self.record_tool_call(call, &observation).await;
                emitter.emit(RunEventPayload::ToolResult { observation });
                if let Some(message) = terminate_message {
                    completion = Some(message);
                }
            }

            if let Some(message) = completion {
                return Ok(LoopExit::Completed(
                    message.or_else(|| Some(text.clone()).filter(|t| !t.is_empty())),
                ));
            }
            if self.is_completion_text(&text) {
                return Ok(LoopExit::Completed(Some(text)));
            }
            self.check_duplicate(&text)?;
        }
    }

    fn ensure_not_cancelled(&self, token: &CancellationToken) -> Result<(), AgentError> {
        if token.is_cancelled() || self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// Window of memory plus the current tool schemas.
    async fn build_request(&self) -> ModelRequest {
        let mut messages = self.memory.window(self.limits.history_window);
        let orphans = messages.iter().take_while(|m| m.role == Role::Tool).count();
        messages.drain(..orphans);

        if let Some(prompt) = &self.system_prompt {
            let starts_with_prompt = messages
                .first()
                .is_some_and(|m| m.role == Role::System && m.text() == prompt);
            if !starts_with_prompt {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }
        if let Some(next) = &self.next_step_prompt {
            messages.push(Message::user(next.clone()));
        }

        ModelRequest::new(messages)
            .with_tools(self.registry.definitions().await)
            .with_settings(self.settings.clone())
    }

    /// Execute one call. Recoverable failures become failed observations;
    /// only run-terminating errors are returned.
    ///
    /// The second element carries the completion message when the call was a
    /// successful `terminate`.
    async fn execute_call(
        &self,
        call: &ToolCall,
        token: &CancellationToken,
    ) -> Result<(ToolObservation, Option<Option<String>>), AgentError> {
        let Some(tool) = self.registry.lookup(&call.name).await else {
            tracing::warn!(tool = %call.name, "model requested an unknown tool");
            let message = format!("Error: Tool '{}' not found", call.name);
            return Ok((ToolObservation::failure(&call.id, &call.name, message), None));
        };

        let args = match ToolArguments::from_serialized(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                let message = format!("Error: {e}");
                return Ok((ToolObservation::failure(&call.id, &call.name, message), None));
            }
        };
        if let Err(violation) = validate_arguments(args.raw(), &tool.parameters().schema) {
            let message = format!("Error: invalid arguments for '{}': {violation}", call.name);
            return Ok((ToolObservation::failure(&call.id, &call.name, message), None));
        }

        let ctx = ToolExecutionContext {
            cancel: token.clone(),
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
        };
        tracing::info!(tool = %call.name, call_id = %call.id, "executing tool");

        match cancellable(token, tool.execute(&args, &ctx)).await {
            Ok(value) => {
                let terminate = (call.name == TERMINATE_TOOL).then(|| {
                    value
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                });
                let raw = render_observation(value);
                let (mut content, truncated) = truncate_chars(&raw, self.limits.max_observe);
                if truncated {
                    content.push_str("...");
                    tracing::debug!(tool = %call.name, max_observe = self.limits.max_observe, "observation truncated");
                }
                let observation = ToolObservation {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    content,
                    success: true,
                    truncated,
                };
                Ok((observation, terminate))
            }
            Err(e) if e.terminates_run() => Err(e),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                let message = format!("Error: {e}");
                Ok((ToolObservation::failure(&call.id, &call.name, message), None))
            }
        }
    }

    fn is_completion_text(&self, text: &str) -> bool {
        if text.is_empty() || self.completion_markers.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.completion_markers.iter().any(|m| lowered.contains(m.as_str()))
    }

    /// Stop when `text` occurs at least `duplicate_threshold` times among the
    /// last `duplicate_window` replies, counting this one.
    fn check_duplicate(&mut self, text: &str) -> Result<(), AgentError> {
        if text.is_empty() {
            return Ok(());
        }
        self.recent_replies.push_back(text.to_string());
        while self.recent_replies.len() > self.limits.duplicate_window {
            self.recent_replies.pop_front();
        }
        let repeats = self.recent_replies.iter().filter(|r| r.as_str() == text).count();
        if repeats >= self.limits.duplicate_threshold {
            tracing::warn!(repeats, "assistant keeps repeating itself");
            return Err(AgentError::StuckLoop {
                repeats,
                text: text.to_string(),
            });
        }
        Ok(())
    }

    async fn remember(&mut self, message: Message) {
        if let Some(history) = &self.history {
            let record = MessageRecord::from_message(&self.conversation_id, &message);
            if let Err(e) = history.append_message(record).await {
                tracing::warn!(error = %e, "failed to record message");
            }
        }
        self.memory.push(message);
    }

    async fn record_tool_call(&self, call: &ToolCall, observation: &ToolObservation) {
        let Some(history) = &self.history else { return };
        let record = ToolCallRecord {
            id: Uuid::new_v4(),
            conversation_id: self.conversation_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: observation.content.clone(),
            success: observation.success,
            truncated: observation.truncated,
            created_at: Utc::now(),
        };
        if let Err(e) = history.append_tool_call(record).await {
            tracing::warn!(error = %e, "failed to record tool call");
        }
    }
}

fn render_observation(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) if s.is_empty() => NO_OUTPUT.to_string(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => NO_OUTPUT.to_string(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model.model_id())
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("limits", &self.limits)
            .field("memory_len", &self.memory.len())
            .finish()
    }
}
