//! Chart planning

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::charts::registry::supported_chart_types;
use crate::errors::AgentError;
use crate::llm::parser::{parse_json_value, require_fields};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::models::{
    AgentState, ChartType, ClarificationRequest, DataRequirement, Progress, QueryInstruction,
    StateName,
};
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const PLANNING_TEMPERATURE: f32 = 0.3;

const REPHRASE_QUESTION: &str = "I'm having a little trouble understanding your request. Could you please rephrase it or provide more details?";

const REPHRASE_CONTEXT: &str = "I couldn't turn your request into a chart plan.";

/// Plan as returned by the model
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartPlan {
    chart_type: ChartType,
    #[serde(default)]
    data_requirements: Vec<DataRequirement>,
    query_plan: Vec<QueryInstruction>,
}

/// Outcome of a planning reply
#[derive(Debug)]
enum PlanReply {
    Plan(ChartPlan),
    Clarify(ClarificationRequest),
}

fn planning_prompt() -> String {
    let supported = supported_chart_types()
        .iter()
        .map(ChartType::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"You are a data visualization expert. Analyze the user's request from the conversation history and create a detailed plan for generating the requested chart. The latest message may be a short follow-up to an earlier clarification.

Your response must be a valid JSON object with the following structure:
{{
  "chartType": "line|bar|pie|scatter|heatmap|radar|sankey|treemap|funnel|calendar|choropleth|network",
  "dataRequirements": [
    {{ "name": "requirement name", "description": "what data is needed", "sqlHint": "hint for SQL generation", "required": true, "dataType": "numeric|categorical|datetime|text" }}
  ],
  "queryPlan": [
    {{ "step": 1, "description": "what this query does", "tables": ["table1"], "expectedOutput": "description of expected result", "dependsOn": [] }}
  ],
  "clarificationNeeded": null or {{ "question": "clarification question", "options": ["option1", "option2"] or null, "context": "why we need clarification" }}
}}

Charts that can currently be rendered: {supported}.

Guidelines:
1. Base the plan on the full conversation; earlier messages may hold details.
2. Choose the most appropriate chart type for the data and use case.
3. Prefer a single comprehensive query; use a second step only when the query has dependencies.
4. Set "clarificationNeeded" when the request lacks a clear metric, a clear grouping dimension, or a timeframe for time series.
5. A clarification question acknowledges what you understood and states exactly what is missing. Give 2-5 "options" for closed questions, null for open ones."#
    )
}

fn parse_plan(reply: &str) -> Result<PlanReply, AgentError> {
    let value = parse_json_value(reply, "planning")?;

    // A clarification request wins over any plan in the same reply
    match value.get("clarificationNeeded") {
        Some(Value::Null) | None => {}
        Some(clarification) => {
            let request: ClarificationRequest = serde_json::from_value(clarification.clone())
                .map_err(|e| AgentError::ParseError(format!("Invalid clarification in planning: {}", e)))?;
            return Ok(PlanReply::Clarify(request));
        }
    }

    require_fields(&value, &["chartType", "queryPlan"], "planning")?;
    let plan: ChartPlan = serde_json::from_value(value)
        .map_err(|e| AgentError::ParseError(format!("Invalid plan in planning: {}", e)))?;
    Ok(PlanReply::Plan(plan))
}

/// Choose a chart type and query plan, or ask the user to clarify
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    info!("Planning chart for request: {}", crate::utils::preview(&state.user_request, 80));

    let mut messages = vec![ChatMessage::system(planning_prompt())];
    messages.extend(state.messages.iter().cloned());

    let planned = async {
        let reply = ctx
            .deps
            .llm
            .complete(&messages, CompletionOptions::with_temperature(PLANNING_TEMPERATURE))
            .await?;
        let plan = parse_plan(&reply)?;
        Ok::<_, AgentError>((plan, reply))
    }
    .await;

    match planned {
        Ok((PlanReply::Clarify(clarification), reply)) => {
            info!("Planner asked for clarification: {}", clarification.question);
            StateUpdate {
                clarification: Some(clarification),
                progress: Some(Progress::new(StateName::Clarifying, "Need more details")),
                messages: vec![ChatMessage::assistant(reply)],
                ..Default::default()
            }
        }
        Ok((PlanReply::Plan(plan), reply)) => {
            info!(
                "Planned {} chart with {} query steps",
                plan.chart_type,
                plan.query_plan.len()
            );
            if plan.query_plan.is_empty() {
                warn!("Planner returned an empty query plan");
            }
            StateUpdate {
                chart_type: Some(plan.chart_type),
                data_requirements: Some(plan.data_requirements),
                query_plan: Some(plan.query_plan),
                progress: Some(Progress::new(
                    StateName::Planning,
                    "Analyzing your request and creating execution plan...",
                )),
                messages: vec![ChatMessage::assistant(reply)],
                ..Default::default()
            }
        }
        Err(e) => {
            warn!("Planning reply unusable, asking to rephrase: {}", e);
            StateUpdate {
                clarification: Some(ClarificationRequest {
                    question: REPHRASE_QUESTION.to_string(),
                    options: None,
                    context: Some(REPHRASE_CONTEXT.to_string()),
                }),
                progress: Some(Progress::new(StateName::Clarifying, "Need more details")),
                ..Default::default()
            }
        }
    }
}
