//! Filtering and paging over recorded history.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use mcp_agent::agent_loop::RunStatus;
use mcp_agent::history::{HistoryFilter, HistorySink, InMemoryHistory, MessageRecord, TaskRecord};
use mcp_agent::types::Message;

fn task(conversation: &str, prompt: &str, status: RunStatus, minutes_ago: i64) -> TaskRecord {
    let started_at = Utc::now() - Duration::minutes(minutes_ago);
    TaskRecord {
        id: Uuid::new_v4(),
        conversation_id: conversation.to_string(),
        prompt: prompt.to_string(),
        status,
        output: None,
        error: None,
        steps: 1,
        started_at,
        finished_at: started_at,
    }
}

async fn seeded() -> InMemoryHistory {
    let history = InMemoryHistory::new();
    for record in [
        task("a", "first", RunStatus::Completed, 30),
        task("a", "second", RunStatus::Failed, 20),
        task("b", "other", RunStatus::Completed, 15),
        task("a", "third", RunStatus::Completed, 10),
        task("a", "fourth", RunStatus::BudgetExhausted, 5),
    ] {
        history.append_task(record).await.unwrap();
    }
    history
}

fn prompts(tasks: &[TaskRecord]) -> Vec<&str> {
    tasks.iter().map(|t| t.prompt.as_str()).collect()
}

#[tokio::test]
async fn filters_by_conversation_and_status() {
    let history = seeded().await;

    let all_a = history.tasks(&HistoryFilter::conversation("a")).await.unwrap();
    assert_eq!(prompts(&all_a), vec!["first", "second", "third", "fourth"]);

    let completed = history
        .tasks(&HistoryFilter::default().with_status(RunStatus::Completed))
        .await
        .unwrap();
    assert_eq!(prompts(&completed), vec!["first", "other", "third"]);
}

#[tokio::test]
async fn pages_in_insertion_order() {
    let history = seeded().await;
    let filter = HistoryFilter::conversation("a");

    let page1 = history.tasks(&filter.clone().with_page(0, 2)).await.unwrap();
    let page2 = history.tasks(&filter.clone().with_page(2, 2)).await.unwrap();
    let page3 = history.tasks(&filter.with_page(4, 2)).await.unwrap();

    assert_eq!(prompts(&page1), vec!["first", "second"]);
    assert_eq!(prompts(&page2), vec!["third", "fourth"]);
    assert!(page3.is_empty());
}

#[tokio::test]
async fn time_bounds_are_inclusive_windows() {
    let history = seeded().await;
    let filter = HistoryFilter {
        since: Some(Utc::now() - Duration::minutes(25)),
        until: Some(Utc::now() - Duration::minutes(8)),
        ..HistoryFilter::default()
    };

    let tasks = history.tasks(&filter).await.unwrap();

    assert_eq!(prompts(&tasks), vec!["second", "other", "third"]);
}

#[tokio::test]
async fn message_records_keep_tool_call_ids() {
    let history = InMemoryHistory::new();
    history
        .append_message(MessageRecord::from_message("c", &Message::user("hi")))
        .await
        .unwrap();
    history
        .append_message(MessageRecord::from_message(
            "c",
            &Message::tool_result("call_1", "shell", "ok"),
        ))
        .await
        .unwrap();

    let records = history.messages(&HistoryFilter::conversation("c")).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tool_call_id, None);
    assert_eq!(records[1].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(records[1].content, "ok");
    assert!(history
        .messages(&HistoryFilter::conversation("other"))
        .await
        .unwrap()
        .is_empty());
}
