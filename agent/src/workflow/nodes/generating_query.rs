//! SQL generation
//!
//! The model writes one query per plan step. Before a query is accepted it
//! must pass the SQLite policy (no CTEs, usable date granularity) and, when
//! schema text is available, the schema adherence check. Unknown tables end
//! the run; unknown columns spend the step's retry budget.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::llm::parser::{extract_json, require_fields};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::models::{AgentState, Progress, QueryInstruction, SqlQuery, StateName, ValidationResult};
use crate::schema::{self, friendly_error_message};
use crate::utils::preview;
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const GENERATION_TEMPERATURE: f32 = 0.1;

const GENERATION_FAILED: &str =
    "Query generation failed: I couldn't produce a usable query for this request. Please try rephrasing it.";

const WEEK_START_HINT: &str = "date(date_column, 'weekday 0', '-6 days') AS week_start_date";

static CTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWITH\s").unwrap());

/// Format argument of each `strftime` call; format letters stay case-sensitive
static STRFTIME_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i:\bstrftime)\s*\(\s*['"]([^'"]*)['"]"#).unwrap());

static DATE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:date|datetime|strftime)\s*\(").unwrap());

static WEEKDAY_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)'weekday\s+0'").unwrap());

static MINUS_SIX_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)'-6\s+days?'").unwrap());

const SQLITE_CONSTRAINTS: &str = "SQLITE REQUIREMENTS:
- Use LIMIT instead of TOP
- Use double quotes for table names with spaces: \"Order Details\"
- Use SQLite date functions: date(), datetime(), strftime(), julianday()
- NO \"WITH\" keyword and NO CTEs, use subqueries instead
- NO MySQL/PostgreSQL/SQL Server syntax";

const DATE_FORMATTING_RULES: &str = "DATE FORMATTING (choose based on the request):
- YEARLY: strftime('%Y', date_column) AS year
- MONTHLY: strftime('%Y-%m', date_column) AS month_year
- WEEKLY: date(date_column, 'weekday 0', '-6 days') AS week_start_date
- DAILY: strftime('%Y-%m-%d', date_column) AS date
Never use strftime('%W') or strftime('%U'); they produce invalid dates like \"2020-15\".

TIME SERIES CHARTS (line, scatter):
- Use a SINGLE combined time field for the x axis, never separate year and month columns
- Example: strftime('%Y-%m', date) AS month_year";

const SCHEMA_ADHERENCE_RULES: &str = "SCHEMA ADHERENCE:
- ONLY use table and column names from the provided schema
- NEVER invent table names like 'purchases' or 'users' unless the schema defines them
- NEVER invent column names
- Use exact table names, quoted when they contain spaces
- Follow the schema's foreign keys for JOINs";

const JSON_RESPONSE_FORMAT: &str = r#"RESPONSE FORMAT: ONLY valid JSON, no explanatory text:
{
  "tablesUsed": ["table1"],
  "columnsUsed": ["table1.column1"],
  "query": "SELECT ...",
  "explanation": "what this query does"
}

EXAMPLES:
- Monthly time series: SELECT strftime('%Y-%m', OrderDate) AS month_year, SUM(amount) FROM Orders GROUP BY strftime('%Y-%m', OrderDate)
- Weekly aggregation: SELECT date(OrderDate, 'weekday 0', '-6 days') AS week_start, COUNT(*) FROM Orders GROUP BY date(OrderDate, 'weekday 0', '-6 days')
- Top N with subquery: WHERE ProductID IN (SELECT ProductID FROM Products ORDER BY Price DESC LIMIT 10)"#;

/// Time granularity asked for by the request or the plan step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    pub yearly: bool,
    pub monthly: bool,
    pub weekly: bool,
    pub daily: bool,
}

fn mentions_any(text: &str, unit: &str) -> bool {
    [
        format!("per {}", unit),
        format!("each {}", unit),
        format!("by {}", unit),
    ]
    .iter()
    .any(|phrase| text.contains(phrase.as_str()))
}

impl Granularity {
    pub fn detect(request: &str, instruction: &str) -> Self {
        let request = request.to_lowercase();
        let instruction = instruction.to_lowercase();
        Self {
            yearly: mentions_any(&request, "year")
                || request.contains("yearly")
                || (instruction.contains("year") && !instruction.contains("month")),
            monthly: mentions_any(&request, "month")
                || request.contains("monthly")
                || instruction.contains("month"),
            weekly: mentions_any(&request, "week")
                || request.contains("weekly")
                || instruction.contains("week"),
            daily: mentions_any(&request, "day") || request.contains("daily"),
        }
    }
}

/// Date formatting found in a query
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DateFormatting {
    year: bool,
    month: bool,
    week_start: bool,
    week_number: bool,
    day_of_year: bool,
    separate_year_month: bool,
}

impl DateFormatting {
    fn scan(query: &str) -> Self {
        let formats: Vec<&str> = STRFTIME_FORMAT
            .captures_iter(query)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .collect();
        let uses = |format: &str| formats.iter().any(|f| *f == format);

        let year_only = uses("%Y");
        Self {
            year: year_only,
            month: formats.iter().any(|f| f.starts_with("%Y-%m")),
            week_start: DATE_CALL.is_match(query)
                && WEEKDAY_ZERO.is_match(query)
                && MINUS_SIX_DAYS.is_match(query),
            week_number: formats.iter().any(|f| f.contains("%W") || f.contains("%U")),
            day_of_year: formats.iter().any(|f| f.contains("%j")),
            separate_year_month: year_only && uses("%m"),
        }
    }
}

/// Reject queries that break the SQLite and date granularity rules
pub fn check_query_policy(query: &str, granularity: Granularity) -> Result<(), String> {
    if CTE.is_match(query) {
        return Err(
            "Query contains forbidden WITH clause (CTE). Only simple SELECT statements allowed."
                .to_string(),
        );
    }

    let formatting = DateFormatting::scan(query);
    if formatting.week_number {
        return Err(format!(
            "Query uses invalid week formatting (strftime '%W' or '%U') which creates invalid dates like \"2020-15\". For weekly data, use: {}",
            WEEK_START_HINT
        ));
    }
    if granularity.weekly && formatting.day_of_year {
        return Err(format!(
            "Query uses day-of-year formatting (strftime '%j') for weekly data. For weekly data, use: {}",
            WEEK_START_HINT
        ));
    }
    if granularity.weekly && !formatting.week_start {
        return Err(format!(
            "Weekly data requested but query does not use proper week formatting. Use: {}",
            WEEK_START_HINT
        ));
    }
    if granularity.monthly {
        if formatting.separate_year_month {
            return Err("Query uses separate Year and Month columns. For time series charts, use strftime('%Y-%m', date_column) AS month_year instead.".to_string());
        }
        if formatting.year && !formatting.month {
            return Err("Query uses year-only date formatting but monthly data was requested. Use strftime('%Y-%m',...) for monthly data.".to_string());
        }
    }
    if granularity.yearly && formatting.month && !formatting.year {
        warn!("Query uses monthly formatting for a yearly request, the chart may be crowded");
    }
    Ok(())
}

fn retry_guidance(state: &AgentState) -> String {
    if state.retry_count == 0 {
        return String::new();
    }
    let issues = state
        .current_validation()
        .map(|v| v.issues.clone())
        .unwrap_or_default();
    let mut guidance = format!(
        "RETRY CONTEXT:\nPrevious attempt failed: {}",
        serde_json::to_string(&issues).unwrap_or_default()
    );
    let weekly_issue = issues
        .iter()
        .any(|issue| issue.contains("week") || issue.contains("%W") || issue.contains("%U"));
    if weekly_issue {
        guidance.push_str(&format!("\nFix weekly formatting: use {} only!", WEEK_START_HINT));
    }
    guidance
}

fn generation_prompt(state: &AgentState, instruction: &QueryInstruction) -> String {
    let chart_type = state.chart_type.map(|c| c.to_string()).unwrap_or_default();
    let requirements = serde_json::to_string_pretty(&state.data_requirements).unwrap_or_default();
    let current = serde_json::to_string_pretty(instruction).unwrap_or_default();
    let schema = match state.schema_context.as_deref() {
        Some(schema) if !schema.trim().is_empty() => format!("\nDatabase Schema:\n{}\n", schema),
        _ => String::new(),
    };

    format!(
        "You are an expert SQL query writer. Generate an optimized SQL query.

CONTEXT:
Chart Type: {chart_type}
Data Requirements: {requirements}
Current Instruction: {current}
{schema}
{guidance}

{SQLITE_CONSTRAINTS}

{DATE_FORMATTING_RULES}

{SCHEMA_ADHERENCE_RULES}

{JSON_RESPONSE_FORMAT}

Generate SQL for: {description}",
        guidance = retry_guidance(state),
        description = instruction.description,
    )
}

fn parse_query(reply: &str, step: usize) -> Result<SqlQuery, AgentError> {
    let value = extract_json(reply, "query generation").ok_or_else(|| {
        AgentError::ParseError(
            "Failed to parse JSON from LLM response. The LLM returned explanatory text instead of JSON format."
                .to_string(),
        )
    })?;
    require_fields(&value, &["query"], "query generation")?;
    let mut query: SqlQuery = serde_json::from_value(value)
        .map_err(|e| AgentError::ParseError(format!("Invalid query payload: {}", e)))?;
    query.step = step;
    Ok(query)
}

fn failed(error: impl Into<String>) -> StateUpdate {
    StateUpdate::failed(error, Progress::new(StateName::Failed, "Query generation failed"))
}

/// Generate the SQL for the current plan step
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    let step = state.current_step;
    let total = state.query_plan.len().max(1);
    info!(
        "Generating query for step {}/{} (retry {})",
        step + 1,
        total,
        state.retry_count
    );
    let progress = Progress::new(
        StateName::GeneratingQuery,
        format!("Generating SQL query (step {}/{})...", step + 1, total),
    );

    let Some(instruction) = state.current_instruction() else {
        error!("No query instruction at step {}", step);
        return failed("No query instruction found");
    };

    let request = ChatMessage::user(format!("Generate SQL for: {}", instruction.description));
    let messages = vec![
        ChatMessage::system(generation_prompt(state, instruction)),
        request.clone(),
    ];

    let generated = async {
        let reply = ctx
            .deps
            .llm
            .complete(&messages, CompletionOptions::with_temperature(GENERATION_TEMPERATURE))
            .await?;
        let query = parse_query(&reply, step)?;
        Ok::<_, AgentError>((query, reply))
    }
    .await;

    let (mut query, reply) = match generated {
        Ok(generated) => generated,
        Err(e) => {
            warn!("Model reply for step {} unusable: {}", step + 1, e);
            error!("Query generation failed at step {}", step + 1);
            return failed(GENERATION_FAILED);
        }
    };
    debug!("Generated SQL for step {}: {}", step + 1, preview(&query.query, 200));

    let granularity = Granularity::detect(&state.user_request, &instruction.description);
    if let Err(reason) = check_query_policy(&query.query, granularity) {
        error!("Rejected query for step {}: {}", step + 1, reason);
        return failed(reason);
    }

    let schema_text = state
        .schema_context
        .as_deref()
        .filter(|schema| !schema.trim().is_empty());
    if let Some(schema_text) = schema_text {
        let validation = schema::validate(&query.query, schema_text);
        if !validation.is_valid {
            warn!(
                "Schema adherence issues in step {}: {:?}",
                step + 1,
                validation.issues
            );
            query.schema_issues = validation.issues.clone();

            if validation.has_table_issues() {
                return failed(friendly_error_message(&validation.issues, schema_text));
            }

            if validation.has_column_issues() {
                if state.can_retry() {
                    let message = format!(
                        "Retrying query generation with schema feedback ({}/{})",
                        state.retry_count + 1,
                        state.max_retries
                    );
                    return StateUpdate {
                        sql_query: Some(query),
                        validation_result: Some(ValidationResult::invalid(
                            step,
                            validation.issues,
                            vec!["Use only columns defined in the schema".to_string()],
                        )),
                        retry_requested: Some(true),
                        progress: Some(Progress::new(StateName::Retrying, message)),
                        ..Default::default()
                    };
                }
                error!("Schema column issues persist after {} attempts", state.retry_count + 1);
                let mut update = failed(friendly_error_message(&validation.issues, schema_text));
                update.retry_count = Some(state.max_retries);
                return update;
            }
        } else {
            debug!(
                "Schema check passed ({} tables, {} columns)",
                validation.tables_found.len(),
                validation.columns_checked
            );
        }
    }

    StateUpdate {
        sql_query: Some(query),
        retry_requested: Some(false),
        progress: Some(progress),
        messages: vec![request, ChatMessage::assistant(reply)],
        ..Default::default()
    }
}
