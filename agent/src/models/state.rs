//! Workflow state record
//!
//! One `AgentState` is created per request and threaded through every step of
//! the run. Steps never mutate it directly; they return a `StateUpdate` that
//! the engine merges.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::models::chart::{
    ChartData, ChartType, ClarificationRequest, DataRequirement, QueryInstruction, QueryResult,
    SqlQuery, ValidationResult,
};

/// Default retry budget per plan step
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classified purpose of the latest message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chart,
    Chat,
    Clarify,
}

/// Named workflow states, used for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateName {
    Routing,
    Planning,
    UnderstandingSchema,
    GeneratingQuery,
    Retrying,
    ExecutingQuery,
    ValidatingResults,
    TransformingData,
    Clarifying,
    Chatting,
    Completed,
    Failed,
}

impl StateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::Routing => "routing",
            StateName::Planning => "planning",
            StateName::UnderstandingSchema => "understanding_schema",
            StateName::GeneratingQuery => "generating_query",
            StateName::Retrying => "retrying",
            StateName::ExecutingQuery => "executing_query",
            StateName::ValidatingResults => "validating_results",
            StateName::TransformingData => "transforming_data",
            StateName::Clarifying => "clarifying",
            StateName::Chatting => "chatting",
            StateName::Completed => "completed",
            StateName::Failed => "failed",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step-level progress descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_state: StateName,
    pub percentage: u8,
    pub message: String,
}

impl Progress {
    pub fn new(current_state: StateName, message: impl Into<String>) -> Self {
        Self {
            current_state,
            percentage: crate::workflow::progress::calculate_progress(current_state),
            message: message.into(),
        }
    }
}

/// The record threaded through one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub user_id: String,
    pub session_id: String,
    pub user_request: String,

    pub intent: Option<Intent>,

    // Plan
    pub chart_type: Option<ChartType>,
    pub data_requirements: Vec<DataRequirement>,
    pub query_plan: Vec<QueryInstruction>,

    // Execution cursor
    pub current_step: usize,
    pub retry_count: u32,
    pub max_retries: u32,

    /// Set by query generation when schema feedback asks for another attempt
    pub retry_requested: bool,

    // Per-step artifacts, indexed by step
    pub sql_queries: Vec<SqlQuery>,
    pub query_results: Vec<QueryResult>,
    pub validation_results: Vec<ValidationResult>,

    // Output
    pub final_chart: Option<ChartData>,
    pub chat_reply: Option<String>,
    pub clarification: Option<ClarificationRequest>,
    pub errors: Vec<String>,

    pub progress: Progress,
    pub messages: Vec<ChatMessage>,
    pub schema_context: Option<String>,
}

impl AgentState {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        user_request: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            user_request: user_request.into(),
            intent: None,
            chart_type: None,
            data_requirements: Vec::new(),
            query_plan: Vec::new(),
            current_step: 0,
            retry_count: 0,
            max_retries: max_retries.max(1),
            retry_requested: false,
            sql_queries: Vec::new(),
            query_results: Vec::new(),
            validation_results: Vec::new(),
            final_chart: None,
            chat_reply: None,
            clarification: None,
            errors: Vec::new(),
            progress: Progress::new(StateName::Routing, "Starting"),
            messages: Vec::new(),
            schema_context: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn current_instruction(&self) -> Option<&QueryInstruction> {
        self.query_plan.get(self.current_step)
    }

    pub fn current_query(&self) -> Option<&SqlQuery> {
        self.sql_queries.get(self.current_step)
    }

    pub fn current_result(&self) -> Option<&QueryResult> {
        self.query_results.get(self.current_step)
    }

    pub fn current_validation(&self) -> Option<&ValidationResult> {
        self.validation_results.get(self.current_step)
    }

    /// Whether a plan step exists after the current one
    pub fn has_more_steps(&self) -> bool {
        self.current_step + 1 < self.query_plan.len()
    }

    /// Whether another generation attempt fits in the retry budget
    pub fn can_retry(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }

    /// Number of populated outputs; a finished run has exactly one
    pub fn output_count(&self) -> usize {
        [
            self.final_chart.is_some(),
            self.chat_reply.is_some(),
            self.clarification.is_some(),
            self.has_errors(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Rows across every step's result
    pub fn total_rows(&self) -> usize {
        self.query_results.iter().map(|r| r.row_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(step: u32) -> QueryInstruction {
        QueryInstruction {
            step,
            description: format!("step {}", step),
            tables: vec![],
            expected_output: String::new(),
            depends_on: vec![],
        }
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = AgentState::new("u1", "s1", "hello", 3);
        assert_eq!(state.current_step, 0);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.output_count(), 0);
        assert_eq!(state.progress.current_state, StateName::Routing);
    }

    #[test]
    fn test_zero_retries_is_raised_to_one() {
        let state = AgentState::new("u1", "s1", "hello", 0);
        assert_eq!(state.max_retries, 1);
        assert!(!state.can_retry());
    }

    #[test]
    fn test_cursor_helpers() {
        let mut state = AgentState::new("u1", "s1", "hello", 3);
        state.query_plan = vec![instruction(1), instruction(2)];
        assert!(state.has_more_steps());
        state.current_step = 1;
        assert!(!state.has_more_steps());
        assert_eq!(state.current_instruction().map(|i| i.step), Some(2));
        state.current_step = 2;
        assert!(state.current_instruction().is_none());
    }

    #[test]
    fn test_state_name_serializes_snake_case() {
        let value = serde_json::to_value(StateName::UnderstandingSchema).unwrap();
        assert_eq!(value, "understanding_schema");
        assert_eq!(StateName::ValidatingResults.to_string(), "validating_results");
    }
}
