//! Partial state updates returned by steps

use crate::llm::ChatMessage;
use crate::models::{
    AgentState, ChartData, ChartType, ClarificationRequest, DataRequirement, Intent, Progress,
    QueryInstruction, QueryResult, SqlQuery, ValidationResult,
};

/// Changes a step wants applied to the state. `None` leaves a field
/// untouched; per-step artifacts are stored at the current step index and
/// `errors`/`messages` are appended.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub intent: Option<Intent>,
    pub chart_type: Option<ChartType>,
    pub data_requirements: Option<Vec<DataRequirement>>,
    pub query_plan: Option<Vec<QueryInstruction>>,
    pub current_step: Option<usize>,
    pub retry_count: Option<u32>,
    pub retry_requested: Option<bool>,
    pub sql_query: Option<SqlQuery>,
    pub query_result: Option<QueryResult>,
    pub validation_result: Option<ValidationResult>,
    pub final_chart: Option<ChartData>,
    pub chat_reply: Option<String>,
    pub clarification: Option<ClarificationRequest>,
    pub schema_context: Option<String>,
    pub progress: Option<Progress>,
    pub errors: Vec<String>,
    pub messages: Vec<ChatMessage>,
}

impl StateUpdate {
    pub fn with_progress(progress: Progress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// A terminal failure of the step
    pub fn failed(error: impl Into<String>, progress: Progress) -> Self {
        Self {
            errors: vec![error.into()],
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// Store `item` at `index`, padding with defaults so artifact lists stay in
/// lockstep with the plan
fn upsert<T: Default>(items: &mut Vec<T>, index: usize, item: T) {
    if items.len() <= index {
        items.resize_with(index + 1, T::default);
    }
    items[index] = item;
}

impl AgentState {
    /// Merge a step's update into the state
    pub fn apply(&mut self, update: StateUpdate) {
        let step = self.current_step;

        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(chart_type) = update.chart_type {
            self.chart_type = Some(chart_type);
        }
        if let Some(requirements) = update.data_requirements {
            self.data_requirements = requirements;
        }
        if let Some(plan) = update.query_plan {
            self.query_plan = plan;
        }
        if let Some(query) = update.sql_query {
            upsert(&mut self.sql_queries, step, query);
        }
        if let Some(result) = update.query_result {
            upsert(&mut self.query_results, step, result);
        }
        if let Some(validation) = update.validation_result {
            upsert(&mut self.validation_results, step, validation);
        }
        if let Some(current_step) = update.current_step {
            self.current_step = current_step;
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(retry_requested) = update.retry_requested {
            self.retry_requested = retry_requested;
        }
        if let Some(chart) = update.final_chart {
            self.final_chart = Some(chart);
        }
        if let Some(reply) = update.chat_reply {
            self.chat_reply = Some(reply);
        }
        if let Some(clarification) = update.clarification {
            self.clarification = Some(clarification);
        }
        if let Some(schema) = update.schema_context {
            self.schema_context = Some(schema);
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        self.errors.extend(update.errors);
        self.messages.extend(update.messages);
    }
}
