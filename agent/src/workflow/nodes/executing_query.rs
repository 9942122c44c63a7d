//! SQL execution

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::errors::AgentError;
use crate::models::{AgentState, Progress, QueryResult, StateName};
use crate::tools::sql::SqlToolInput;
use crate::tools::{Tool, SQL_QUERY_TOOL};
use crate::utils::preview;
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

/// Rows from a tool reply, or the tool-level error it carries
pub fn parse_tool_reply(reply: &str) -> Result<Vec<Map<String, Value>>, AgentError> {
    let value: Value = serde_json::from_str(reply).map_err(|e| {
        AgentError::ToolError(format!("Invalid response from SQL tool: {}", e))
    })?;

    if let Some(err) = value.get("error").filter(|err| !err.is_null()) {
        let message = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(AgentError::ToolError(format!("SQL execution failed: {}", message)));
    }

    let rows: &[Value] = match &value {
        Value::Array(rows) => rows.as_slice(),
        Value::Object(body) => body
            .get("data")
            .or_else(|| body.get("results"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    Ok(rows.iter().filter_map(Value::as_object).cloned().collect())
}

fn tool_error_message(err: AgentError) -> String {
    match err {
        AgentError::ToolError(message) => message,
        other => other.to_string(),
    }
}

/// Run the current step's SQL through the SQL tool
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    let step = state.current_step;
    let progress = Progress::new(
        StateName::ExecutingQuery,
        format!(
            "Executing SQL query (step {}/{})...",
            step + 1,
            state.query_plan.len().max(1)
        ),
    );

    let Some(sql) = state.current_query() else {
        error!(
            "No SQL query at step {} ({} queries generated)",
            step,
            state.sql_queries.len()
        );
        return StateUpdate::failed(
            "No SQL query to execute",
            Progress::new(StateName::Failed, "Query execution failed"),
        );
    };

    let Some(tool) = ctx.deps.tools.get_tool(SQL_QUERY_TOOL) else {
        error!("Tool '{}' is not registered", SQL_QUERY_TOOL);
        return StateUpdate::failed(
            "SQL query tool not available",
            Progress::new(StateName::Failed, "Query execution failed"),
        );
    };

    let input = SqlToolInput {
        query: sql.query.clone(),
        database: None,
    };
    let input = match serde_json::to_string(&input) {
        Ok(input) => input,
        Err(e) => {
            return StateUpdate {
                query_result: Some(QueryResult::failed(step, e.to_string())),
                progress: Some(progress),
                ..Default::default()
            }
        }
    };

    debug!("Invoking {} for step {}: {}", tool.name(), step + 1, preview(&sql.query, 120));
    let started = Instant::now();
    let outcome = tool.invoke(&input).await;
    let elapsed = started.elapsed().as_millis() as u64;

    let result = match outcome.and_then(|reply| {
        debug!("SQL tool replied: {}", preview(&reply, 200));
        parse_tool_reply(&reply)
    }) {
        Ok(rows) => {
            info!("Query returned {} rows in {} ms", rows.len(), elapsed);
            QueryResult {
                step,
                row_count: rows.len(),
                data: rows,
                execution_time_ms: elapsed,
                error: None,
            }
        }
        Err(e) => {
            let message = tool_error_message(e);
            error!("Query execution failed: {}", message);
            QueryResult::failed(step, message)
        }
    };

    StateUpdate {
        query_result: Some(result),
        progress: Some(progress),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_data_field() {
        let rows = parse_tool_reply(r#"{"data": [{"region": "North", "revenue": 100}]}"#).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["region"], "North");
    }

    #[test]
    fn test_rows_from_results_field_and_bare_array() {
        assert_eq!(parse_tool_reply(r#"{"results": [{"a": 1}, {"a": 2}]}"#).unwrap().len(), 2);
        assert_eq!(parse_tool_reply(r#"[{"a": 1}]"#).unwrap().len(), 1);
        assert!(parse_tool_reply(r#"{"rowCount": 0}"#).unwrap().is_empty());
    }

    #[test]
    fn test_tool_error_is_reported() {
        let err = parse_tool_reply(r#"{"error": "no such table: Sales"}"#).unwrap_err();
        assert_eq!(
            tool_error_message(err),
            "SQL execution failed: no such table: Sales"
        );
        assert!(parse_tool_reply("not json").is_err());
    }
}
