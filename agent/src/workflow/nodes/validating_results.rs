//! Result validation
//!
//! The model judges whether a step's rows can feed the chart. Execution errors
//! naming a missing table or column are invalid regardless of its verdict,
//! and an unreadable verdict counts as invalid.

use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::llm::parser::parse_json_response;
use crate::llm::{ChatMessage, CompletionOptions};
use crate::models::{AgentState, Progress, QueryResult, StateName, ValidationResult};
use crate::utils::truncate_chars;
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const VALIDATION_TEMPERATURE: f32 = 0.1;
const SAMPLE_ROWS: usize = 5;
const SCHEMA_EXCERPT_CHARS: usize = 2000;

fn validation_prompt(state: &AgentState, result: &QueryResult, expected_output: &str) -> String {
    let sample = &result.data[..result.data.len().min(SAMPLE_ROWS)];
    let sample = serde_json::to_string_pretty(sample).unwrap_or_default();
    let schema = match state.schema_context.as_deref() {
        Some(schema) if !schema.trim().is_empty() => {
            format!("{}...", truncate_chars(schema, SCHEMA_EXCERPT_CHARS))
        }
        _ => "No schema available".to_string(),
    };

    format!(
        r#"Validate the SQL query results for chart generation:

Chart Type: {chart_type}
Expected Output: {expected_output}
Query Result Summary:
- Row Count: {row_count}
- Execution Time: {time}ms
- Error: {error}
- Sample Data (first {SAMPLE_ROWS} rows): {sample}

Database Schema Context:
{schema}

Your response must be a valid JSON object:
{{
  "isValid": true/false,
  "issues": ["issue1", "issue2"],
  "suggestions": ["suggestion1", "suggestion2"]
}}

Validation criteria:
1. Check if the data structure matches the chart requirements
2. Verify there are enough data points
3. Check for null or missing values
4. Validate data types and aggregation
5. If the error contains "no such table" or "no such column", mark the result as invalid
6. Check that the query used only tables and columns from the provided schema, and suggest actual schema names when it did not"#,
        chart_type = state.chart_type.map(|c| c.to_string()).unwrap_or_default(),
        row_count = result.row_count,
        time = result.execution_time_ms,
        error = result.error.as_deref().unwrap_or("None"),
    )
}

fn parse_verdict(reply: &str, step: usize) -> Result<ValidationResult, AgentError> {
    let mut verdict: ValidationResult =
        parse_json_response(reply, &["isValid"], "result validation")?;
    verdict.step = step;
    Ok(verdict)
}

/// Missing table or column errors override the model's verdict
fn enforce_schema_errors(mut verdict: ValidationResult, result: &QueryResult) -> ValidationResult {
    let Some(err) = result.error.as_deref() else {
        return verdict;
    };
    let lowered = err.to_lowercase();
    if verdict.is_valid && (lowered.contains("no such table") || lowered.contains("no such column")) {
        warn!("Execution error overrides a valid verdict: {}", err);
        verdict.is_valid = false;
        verdict.issues.push(err.to_string());
        verdict
            .suggestions
            .push("Use table and column names from the provided schema".to_string());
    }
    verdict
}

/// Judge the current step's query result
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    let step = state.current_step;
    let progress = Progress::new(StateName::ValidatingResults, "Validating query results...");

    let (Some(result), Some(instruction)) = (state.current_result(), state.current_instruction())
    else {
        error!(
            "Nothing to validate at step {} ({} results, {} plan steps)",
            step,
            state.query_results.len(),
            state.query_plan.len()
        );
        return StateUpdate::failed(
            "No results to validate",
            Progress::new(StateName::Failed, "Result validation failed"),
        );
    };

    let request = ChatMessage::user("Validate the query results");
    let messages = vec![
        ChatMessage::system(validation_prompt(state, result, &instruction.expected_output)),
        request.clone(),
    ];

    let judged = async {
        let reply = ctx
            .deps
            .llm
            .complete(&messages, CompletionOptions::with_temperature(VALIDATION_TEMPERATURE))
            .await?;
        let verdict = parse_verdict(&reply, step)?;
        Ok::<_, AgentError>((verdict, reply))
    }
    .await;

    let mut update = StateUpdate::with_progress(progress);
    let verdict = match judged {
        Ok((verdict, reply)) => {
            update.messages = vec![request, ChatMessage::assistant(reply)];
            enforce_schema_errors(verdict, result)
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            ValidationResult::invalid(
                step,
                vec!["Validation process failed".to_string()],
                vec!["Retry query generation".to_string()],
            )
        }
    };

    if verdict.is_valid {
        info!("Step {} result is valid ({} rows)", step + 1, result.row_count);
    } else if state.can_retry() {
        warn!("Step {} result is invalid: {:?}", step + 1, verdict.issues);
    } else {
        let attempts = state.retry_count + 1;
        error!("Step {} still invalid after {} attempts", step + 1, attempts);
        update.errors.push(format!(
            "Query validation failed after {} attempts: {}",
            attempts,
            verdict.issues.join(", ")
        ));
        update.retry_count = Some(state.max_retries);
        update.progress = Some(Progress::new(StateName::Failed, "Result validation failed"));
    }

    update.validation_result = Some(verdict);
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_error(error: Option<&str>) -> QueryResult {
        QueryResult {
            step: 0,
            data: Vec::new(),
            row_count: 0,
            execution_time_ms: 3,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_verdict() {
        let verdict = parse_verdict(
            r#"{"isValid": false, "issues": ["no rows"], "suggestions": ["widen the filter"]}"#,
            1,
        )
        .unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.step, 1);
        assert_eq!(verdict.issues, vec!["no rows"]);

        let verdict = parse_verdict(r#"{"isValid": true}"#, 0).unwrap();
        assert!(verdict.is_valid);
        assert!(verdict.issues.is_empty());

        assert!(parse_verdict(r#"{"issues": []}"#, 0).is_err());
    }

    #[test]
    fn test_schema_errors_override_valid_verdict() {
        let verdict = enforce_schema_errors(
            ValidationResult::valid(0),
            &result_with_error(Some("SQL execution failed: no such column: Revenue")),
        );
        assert!(!verdict.is_valid);
        assert_eq!(verdict.issues.len(), 1);

        let verdict = enforce_schema_errors(ValidationResult::valid(0), &result_with_error(None));
        assert!(verdict.is_valid);
    }

    #[test]
    fn test_prompt_truncates_schema() {
        let mut state = AgentState::new("u1", "s1", "request", 3);
        state.schema_context = Some("x".repeat(5000));
        let prompt = validation_prompt(&state, &result_with_error(None), "region, revenue");
        assert!(prompt.contains("Expected Output: region, revenue"));
        assert!(prompt.contains("- Error: None"));
        assert!(!prompt.contains(&"x".repeat(2001)));
    }
}
