//! Append-only run history: message, task and tool-call records.
//!
//! The agent only ever appends through [`HistorySink`]; reading back is for
//! inspection tools and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_loop::types::RunStatus;
use crate::error::AgentError;
use crate::types::{Message, Role};

pub mod memory;

pub use memory::InMemoryHistory;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn from_message(conversation_id: &str, message: &Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            role: message.role,
            content: message.text().to_string(),
            tool_call_id: message.tool_call_id.clone(),
            created_at: message.timestamp,
        }
    }
}

/// One finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub conversation_id: String,
    pub prompt: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub conversation_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: String,
    pub result: String,
    pub success: bool,
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
}

/// Query over stored records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub conversation_id: Option<String>,
    /// Only applies to task records.
    pub status: Option<RunStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl HistoryFilter {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, conversation_id: &str, at: DateTime<Utc>) -> bool {
        self.conversation_id
            .as_deref()
            .map_or(true, |id| id == conversation_id)
            && self.since.map_or(true, |since| at >= since)
            && self.until.map_or(true, |until| at <= until)
    }

    pub(crate) fn paginate<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let items = items.skip(self.offset);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}

/// Destination for run records.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append_message(&self, record: MessageRecord) -> Result<(), AgentError>;

    async fn append_task(&self, record: TaskRecord) -> Result<(), AgentError>;

    async fn append_tool_call(&self, record: ToolCallRecord) -> Result<(), AgentError>;

    async fn messages(&self, filter: &HistoryFilter) -> Result<Vec<MessageRecord>, AgentError>;

    async fn tasks(&self, filter: &HistoryFilter) -> Result<Vec<TaskRecord>, AgentError>;

    async fn tool_calls(&self, filter: &HistoryFilter) -> Result<Vec<ToolCallRecord>, AgentError>;
}
