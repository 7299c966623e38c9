//! Core run types for the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
pub type RunId = Uuid;

/// Agent state machine. `Finished` and `Error` are terminal for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Finished,
    Error,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Step limit reached without completion. Not an error.
    BudgetExhausted,
    StuckLoop,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Whether the CLI should treat this outcome as a failure.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::StuckLoop | Self::Cancelled | Self::Failed)
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Model calls made.
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn new(run_id: RunId, status: RunStatus, steps: usize) -> Self {
        Self {
            run_id,
            status,
            output: None,
            steps,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(run_id: RunId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(run_id, RunStatus::Failed, 0)
        }
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// What one tool call produced, as stored in memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolObservation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
    pub success: bool,
    pub truncated: bool,
}

impl ToolObservation {
    pub fn failure(tool_call_id: &str, tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            content: content.into(),
            success: false,
            truncated: false,
        }
    }
}
