//! Orchestrator request handling

use std::sync::Arc;

use chart_api::models::{AgentRequest, EventType};

use chartflow::agent::Orchestrator;
use chartflow::errors::AgentError;
use chartflow::llm::Role;
use chartflow::memory::{InMemoryStore, MemoryStore};

use crate::support::*;

#[tokio::test]
async fn test_chart_request_returns_payload_and_metadata() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let memory = memory_with_schema(ORDERS_SCHEMA).await;
    let orchestrator = Orchestrator::new(deps(llm, Some(tool), memory.clone()));

    let response = orchestrator
        .process_request(AgentRequest::new("u1", "s1", "Show me a pie chart of revenue by region"))
        .await
        .unwrap();

    assert_eq!(response.state(), Some("completed"));
    assert_eq!(response.metadata["chartType"], "pie");
    assert_eq!(response.metadata["queryCount"], 1);
    assert_eq!(response.metadata["totalRows"], 2);
    let chart = response.chart_data.expect("chart payload");
    assert_eq!(chart["type"], "pie");
    assert!(!response.message.is_empty());

    let turns = memory.get_recent_messages("u1", "s1", 5).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].user_message, "Show me a pie chart of revenue by region");
    assert_eq!(turns[0].assistant_response, response.message);
}

#[tokio::test]
async fn test_history_is_sent_to_routing() {
    let memory = Arc::new(InMemoryStore::new());
    memory
        .store_short_term_memory("u1", "s1", "hello", "Hi! How can I help?")
        .await
        .unwrap();
    let llm = Arc::new(ScriptedLlm::new([routing("chat"), "Sure.".to_string()]));
    let orchestrator = Orchestrator::new(deps(llm.clone(), None, memory.clone()));

    let response = orchestrator
        .process_request(AgentRequest::new("u1", "s1", "can you help me?"))
        .await
        .unwrap();
    assert_eq!(response.message, "Sure.");

    let routing_call = &llm.calls()[0];
    let roles: Vec<Role> = routing_call.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(routing_call[3].content, "can you help me?");

    assert_eq!(memory.get_recent_messages("u1", "s1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_run_lists_errors() {
    let llm = Arc::new(ScriptedLlm::new(["not json".to_string()]));
    let orchestrator = Orchestrator::new(deps(llm, None, Arc::new(InMemoryStore::new())));

    let response = orchestrator
        .process_request(AgentRequest::new("u1", "s1", "pie of revenue"))
        .await
        .unwrap();

    assert_eq!(response.state(), Some("failed"));
    assert!(response.message.starts_with("I encountered errors: Routing failed"));
    assert!(response.chart_data.is_none());
}

#[test]
fn test_invalid_request_is_rejected() {
    let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
    let orchestrator = Orchestrator::new(deps(llm.clone(), None, Arc::new(InMemoryStore::new())));

    let err = tokio_test::block_on(
        orchestrator.process_request(AgentRequest::new("u1", "", "hello")),
    )
    .unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));

    let err = orchestrator
        .stream_request(AgentRequest::new("u1", "s1", "x".repeat(10_001)))
        .unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn test_stream_emits_progress_then_done() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(false, &["Too few rows"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let orchestrator = Orchestrator::new(deps(llm, Some(tool), Arc::new(InMemoryStore::new())));

    let (mut events, handle) = orchestrator
        .stream_request(AgentRequest::new("u1", "s1", "pie of revenue by region"))
        .unwrap();

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    let response = handle.await.unwrap();

    let last = received.last().unwrap();
    assert_eq!(last.event_type, EventType::Done);
    assert_eq!(last.data.message, response.message);

    let percentages: Vec<u8> = received
        .iter()
        .filter(|e| e.event_type == EventType::Progress)
        .filter_map(|e| e.data.percentage)
        .collect();
    assert!(percentages.len() >= 8);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{:?}", percentages);
    assert_eq!(percentages.last(), Some(&100));
}

#[tokio::test]
async fn test_stream_chat_forwards_content() {
    let llm = Arc::new(ScriptedLlm::new([routing("chat"), "Hello there".to_string()]));
    let orchestrator = Orchestrator::new(deps(llm, None, Arc::new(InMemoryStore::new())));

    let (mut events, handle) = orchestrator
        .stream_request(AgentRequest::new("u1", "s1", "hi"))
        .unwrap();
    let mut content = String::new();
    let mut kinds = Vec::new();
    while let Some(event) = events.recv().await {
        if let Some(chunk) = &event.data.content {
            content.push_str(chunk);
        }
        kinds.push(event.event_type);
    }

    assert_eq!(handle.await.unwrap().message, "Hello there");
    assert_eq!(content, "Hello there");
    assert_eq!(kinds.last(), Some(&EventType::Done));
}

#[tokio::test]
async fn test_stream_failure_ends_with_error_event() {
    let llm = Arc::new(ScriptedLlm::new(["not json".to_string()]));
    let orchestrator = Orchestrator::new(deps(llm, None, Arc::new(InMemoryStore::new())));

    let (mut events, handle) = orchestrator
        .stream_request(AgentRequest::new("u1", "s1", "pie of revenue"))
        .unwrap();
    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }

    let last = last.unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert!(last.data.message.starts_with("Request failed: I encountered errors"));
    assert_eq!(handle.await.unwrap().state(), Some("failed"));
}
