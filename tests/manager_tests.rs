//! Client manager behavior against in-memory sessions.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{any_transport, CallBehavior, MockFactory, MockSession};
use mcp_agent::error::AgentError;
use mcp_agent::mcp::{ClientManager, DeclaredServer, Session, SessionOptions, SessionStatus, NO_OUTPUT};
use mcp_agent::tools::{Tool, ToolArguments, ToolExecutionContext};

fn manager(factory: Arc<MockFactory>) -> ClientManager {
    ClientManager::with_factory(factory, SessionOptions::default())
}

fn declared(ids: &[&str]) -> Vec<DeclaredServer> {
    ids.iter()
        .map(|id| DeclaredServer::new(*id, any_transport()))
        .collect()
}

async fn tool_names(manager: &ClientManager) -> Vec<String> {
    manager
        .all_tools()
        .await
        .iter()
        .map(|t| t.name().to_string())
        .collect()
}

#[tokio::test]
async fn identically_named_tools_are_namespaced_per_server() {
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("A", &["echo"]))
            .with(MockSession::new("B", &["echo"])),
    );
    let manager = manager(factory);

    let connected = manager
        .initialize_from_declared(&declared(&["A", "B"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connected, vec!["A", "B"]);
    assert_eq!(tool_names(&manager).await, vec!["mcp_A_echo", "mcp_B_echo"]);
    assert!(manager.get_tool("echo").await.is_none());
}

#[tokio::test]
async fn failed_servers_are_skipped_not_fatal() {
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("one", &["a"]))
            .with(MockSession::new("two", &["b"]).failing_initialize())
            .with(MockSession::new("three", &["c"]))
            .with(MockSession::new("four", &["d"]).failing_list()),
    );
    let manager = manager(Arc::clone(&factory));

    // "ghost" is unknown to the factory, so opening it fails too.
    let connected = manager
        .initialize_from_declared(
            &declared(&["one", "two", "ghost", "three", "four"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(connected, vec!["one", "three"]);
    assert_eq!(manager.server_ids().await, vec!["one", "three"]);
    assert_eq!(tool_names(&manager).await, vec!["mcp_one_a", "mcp_three_c"]);
}

#[tokio::test]
async fn discovery_failure_rolls_back_the_session() {
    let factory = Arc::new(MockFactory::new().with(MockSession::new("flaky", &["x"]).failing_list()));
    let manager = manager(Arc::clone(&factory));

    let err = manager
        .connect("flaky", &any_transport(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Protocol(_)));
    assert_eq!(factory.get("flaky").close_count(), 1);
    assert!(manager.server_ids().await.is_empty());
    assert!(manager.all_tools().await.is_empty());
}

#[tokio::test]
async fn disconnect_only_removes_that_servers_tools() {
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("files", &["read", "write"]))
            .with(MockSession::new("web", &["search"])),
    );
    let manager = manager(Arc::clone(&factory));
    manager
        .initialize_from_declared(&declared(&["files", "web"]), &CancellationToken::new())
        .await
        .unwrap();

    manager.disconnect("files").await.unwrap();

    assert_eq!(tool_names(&manager).await, vec!["mcp_web_search"]);
    assert_eq!(factory.get("files").close_count(), 1);
    assert_eq!(factory.get("web").close_count(), 0);

    // Unknown and repeated disconnects are no-ops.
    manager.disconnect("files").await.unwrap();
    assert_eq!(factory.get("files").close_count(), 1);
}

#[tokio::test]
async fn reconnecting_an_id_replaces_the_old_session() {
    let manager = ClientManager::default();
    let first = Arc::new(MockSession::new("svc", &["old"]));
    let second = Arc::new(MockSession::new("svc", &["new"]));
    let cancel = CancellationToken::new();

    manager.connect_session(first.clone(), &cancel).await.unwrap();
    manager.connect_session(second.clone(), &cancel).await.unwrap();

    assert_eq!(first.close_count(), 1);
    assert_eq!(first.status(), SessionStatus::Closed);
    assert_eq!(tool_names(&manager).await, vec!["mcp_svc_new"]);
}

#[tokio::test]
async fn cancelled_batch_stops_before_connecting() {
    let factory = Arc::new(MockFactory::new().with(MockSession::new("A", &["echo"])));
    let manager = manager(factory);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = manager
        .initialize_from_declared(&declared(&["A"]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Cancelled));
    assert!(manager.server_ids().await.is_empty());
}

#[tokio::test]
async fn cancellation_between_servers_skips_the_rest() {
    let cancel = CancellationToken::new();
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("A", &["x"]).cancel_on_list(cancel.clone()))
            .with(MockSession::new("B", &["y"]))
            .with(MockSession::new("C", &["z"])),
    );
    let manager = manager(Arc::clone(&factory));

    let err = manager
        .initialize_from_declared(&declared(&["A", "B", "C"]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(factory.opened(), vec!["A"]);
    // What connected before the cancel stays for the caller to close.
    assert_eq!(manager.server_ids().await, vec!["A"]);
    assert_eq!(factory.get("A").close_count(), 0);
}

#[tokio::test]
async fn initialize_or_close_releases_partial_connections() {
    let cancel = CancellationToken::new();
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("A", &["x"]).cancel_on_list(cancel.clone()))
            .with(MockSession::new("B", &["y"])),
    );
    let manager = manager(Arc::clone(&factory));

    let err = manager
        .initialize_or_close(&declared(&["A", "B"]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Cancelled));
    assert!(manager.server_ids().await.is_empty());
    assert!(manager.all_tools().await.is_empty());
    assert_eq!(factory.get("A").close_count(), 1);
    assert_eq!(factory.get("A").status(), SessionStatus::Closed);
}

#[tokio::test]
async fn initialize_or_close_keeps_sessions_on_success() {
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("A", &["x"]))
            .with(MockSession::new("B", &["y"]).failing_initialize()),
    );
    let manager = manager(Arc::clone(&factory));

    let connected = manager
        .initialize_or_close(&declared(&["A", "B"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connected, vec!["A"]);
    assert_eq!(factory.get("A").close_count(), 0);
}

#[tokio::test]
async fn close_disconnects_everything() {
    let factory = Arc::new(
        MockFactory::new()
            .with(MockSession::new("A", &["x"]))
            .with(MockSession::new("B", &["y"])),
    );
    let manager = manager(Arc::clone(&factory));
    manager
        .initialize_from_declared(&declared(&["A", "B"]), &CancellationToken::new())
        .await
        .unwrap();

    manager.close().await.unwrap();

    assert!(manager.all_tools().await.is_empty());
    assert_eq!(factory.get("A").close_count(), 1);
    assert_eq!(factory.get("B").close_count(), 1);
}

#[tokio::test]
async fn adapter_forwards_original_name_and_flattens_output() {
    let manager = ClientManager::default();
    let session = Arc::new(MockSession::new("A", &["echo"]));
    manager
        .connect_session(session.clone(), &CancellationToken::new())
        .await
        .unwrap();

    let tool = manager.get_tool("mcp_A_echo").await.unwrap();
    assert_eq!(tool.required_parameters(), vec!["text"]);
    assert_eq!(tool.original_name(), "echo");

    let args = ToolArguments::from_serialized(r#"{"text":"42"}"#).unwrap();
    let out = tool.execute(&args, &ToolExecutionContext::default()).await.unwrap();

    assert_eq!(out, json!("42"));
    assert_eq!(session.calls()[0].0, "echo");
}

#[tokio::test]
async fn empty_remote_result_becomes_sentinel() {
    let manager = ClientManager::default();
    let session = Arc::new(MockSession::new("A", &["noop"]).with_behavior(CallBehavior::Empty));
    manager
        .connect_session(session, &CancellationToken::new())
        .await
        .unwrap();

    let tool = manager.get_tool("mcp_A_noop").await.unwrap();
    let args = ToolArguments::from_serialized("").unwrap();
    let out = tool.execute(&args, &ToolExecutionContext::default()).await.unwrap();

    assert_eq!(out, json!(NO_OUTPUT));
}
