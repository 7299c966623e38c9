use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryFilter, HistorySink, MessageRecord, TaskRecord, ToolCallRecord};
use crate::error::AgentError;

#[derive(Debug, Default)]
struct Records {
    messages: Vec<MessageRecord>,
    tasks: Vec<TaskRecord>,
    tool_calls: Vec<ToolCallRecord>,
}

/// Process-local [`HistorySink`]. Records are kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<Records>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn append_message(&self, record: MessageRecord) -> Result<(), AgentError> {
        self.records.write().await.messages.push(record);
        Ok(())
    }

    async fn append_task(&self, record: TaskRecord) -> Result<(), AgentError> {
        self.records.write().await.tasks.push(record);
        Ok(())
    }

    async fn append_tool_call(&self, record: ToolCallRecord) -> Result<(), AgentError> {
        self.records.write().await.tool_calls.push(record);
        Ok(())
    }

    async fn messages(&self, filter: &HistoryFilter) -> Result<Vec<MessageRecord>, AgentError> {
        let records = self.records.read().await;
        Ok(filter.paginate(
            records
                .messages
                .iter()
                .filter(|r| filter.matches(&r.conversation_id, r.created_at))
                .cloned(),
        ))
    }

    async fn tasks(&self, filter: &HistoryFilter) -> Result<Vec<TaskRecord>, AgentError> {
        let records = self.records.read().await;
        Ok(filter.paginate(
            records
                .tasks
                .iter()
                .filter(|r| filter.matches(&r.conversation_id, r.started_at))
                .filter(|r| filter.status.map_or(true, |s| s == r.status))
                .cloned(),
        ))
    }

    async fn tool_calls(&self, filter: &HistoryFilter) -> Result<Vec<ToolCallRecord>, AgentError> {
        let records = self.records.read().await;
        Ok(filter.paginate(
            records
                .tool_calls
                .iter()
                .filter(|r| filter.matches(&r.conversation_id, r.created_at))
                .cloned(),
        ))
    }
}
