//! Request façade over the workflow engine
//!
//! Validates the request, seeds the run with recent history, runs the
//! workflow, maps the final state to a response and records the turn.

use chart_api::models::{AgentRequest, AgentResponse, Clarification, ProgressEvent};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::llm::ChatMessage;
use crate::models::AgentState;
use crate::workflow::progress::{ChannelObserver, ProgressObserver, OPERATION};
use crate::workflow::{self, NodeDeps};

const EMPTY_REPLY: &str = "The request completed, but I have no specific output.";

/// Runs requests through the chart workflow
#[derive(Clone)]
pub struct Orchestrator {
    deps: NodeDeps,
}

impl Orchestrator {
    pub fn new(deps: NodeDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &NodeDeps {
        &self.deps
    }

    /// Run one request to completion
    pub async fn process_request(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        request.validate().map_err(AgentError::ValidationError)?;
        info!(
            "Processing request for {}/{}",
            request.user_id, request.session_id
        );
        Ok(self.execute(&request, None).await)
    }

    /// Run one request in the background, streaming progress events. The
    /// channel ends with a `done` event, or an `error` event when the run
    /// failed.
    pub fn stream_request(
        &self,
        request: AgentRequest,
    ) -> Result<(UnboundedReceiver<ProgressEvent>, JoinHandle<AgentResponse>), AgentError> {
        request.validate().map_err(AgentError::ValidationError)?;
        info!(
            "Streaming request for {}/{}",
            request.user_id, request.session_id
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            let observer = ChannelObserver::new(tx.clone());
            let response = orchestrator
                .execute(&request, Some(&observer as &dyn ProgressObserver))
                .await;

            let event = if response.state() == Some("failed") {
                ProgressEvent::error(
                    OPERATION,
                    &format!("Request failed: {}", response.message),
                    Some(response.metadata.clone()),
                )
            } else {
                let metadata = serde_json::to_value(&response)
                    .ok()
                    .and_then(|value| value.as_object().cloned());
                ProgressEvent::done(OPERATION, &response.message, metadata)
            };
            if tx.send(event).is_err() {
                debug!("Event receiver closed before the final event");
            }
            response
        });

        Ok((rx, handle))
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        observer: Option<&dyn ProgressObserver>,
    ) -> AgentResponse {
        let state = self.initial_state(request).await;
        let state = workflow::run(state, &self.deps, observer).await;
        let response = build_response(&state);

        if let Err(e) = self
            .deps
            .memory
            .store_short_term_memory(
                &request.user_id,
                &request.session_id,
                &request.message,
                &response.message,
            )
            .await
        {
            warn!("Failed to store conversation turn: {}", e);
        }
        response
    }

    /// Fresh state whose messages are the recent turns followed by the request
    async fn initial_state(&self, request: &AgentRequest) -> AgentState {
        let mut messages = Vec::new();
        match self
            .deps
            .memory
            .get_recent_messages(
                &request.user_id,
                &request.session_id,
                self.deps.options.history_limit,
            )
            .await
        {
            Ok(turns) => {
                for turn in turns {
                    messages.push(ChatMessage::user(turn.user_message));
                    messages.push(ChatMessage::assistant(turn.assistant_response));
                }
            }
            Err(e) => error!("Failed to load conversation history: {}", e),
        }
        messages.push(ChatMessage::user(request.message.clone()));

        AgentState::new(
            request.user_id.clone(),
            request.session_id.clone(),
            request.message.clone(),
            self.deps.options.max_retries,
        )
        .with_messages(messages)
    }
}

fn base_metadata(state: &AgentState, tag: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("state".to_string(), json!(tag));
    if let Some(chart_type) = state.chart_type {
        metadata.insert("chartType".to_string(), json!(chart_type));
    }
    metadata.insert("queryCount".to_string(), json!(state.sql_queries.len()));
    metadata.insert("totalRows".to_string(), json!(state.total_rows()));
    metadata
}

/// Response for a finished run. Clarification wins over errors, errors over
/// a chart and a chart over a chat reply.
pub fn build_response(state: &AgentState) -> AgentResponse {
    if let Some(clarification) = &state.clarification {
        return AgentResponse {
            message: clarification.question.clone(),
            chart_data: None,
            clarification_needed: Some(Clarification {
                question: clarification.question.clone(),
                options: clarification.options.clone(),
                context: clarification.context.clone(),
            }),
            metadata: base_metadata(state, "clarification_needed"),
        };
    }

    if state.has_errors() {
        let mut metadata = base_metadata(state, "failed");
        metadata.insert("errors".to_string(), json!(state.errors));
        return AgentResponse {
            message: format!("I encountered errors: {}", state.errors.join(", ")),
            chart_data: None,
            clarification_needed: None,
            metadata,
        };
    }

    if let Some(chart) = &state.final_chart {
        let message = chart
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "Here is your chart:".to_string());
        return AgentResponse {
            message,
            chart_data: serde_json::to_value(chart).ok(),
            clarification_needed: None,
            metadata: base_metadata(state, "completed"),
        };
    }

    if let Some(reply) = &state.chat_reply {
        return AgentResponse {
            message: reply.clone(),
            chart_data: None,
            clarification_needed: None,
            metadata: base_metadata(state, "completed"),
        };
    }

    AgentResponse {
        message: EMPTY_REPLY.to_string(),
        chart_data: None,
        clarification_needed: None,
        metadata: base_metadata(state, "completed_empty"),
    }
}
