//! Workflow engine runs against scripted collaborators

use std::sync::Arc;

use serde_json::{json, Value};

use chartflow::memory::InMemoryStore;
use chartflow::models::{ChartType, Intent, StateName};
use chartflow::workflow;

use crate::support::*;

#[tokio::test]
async fn test_pie_chart_of_revenue_by_region() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let memory = memory_with_schema(ORDERS_SCHEMA).await;
    let deps = deps(llm.clone(), Some(tool.clone()), memory);

    let state = workflow::run(state("Show me a pie chart of revenue by region"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    assert_eq!(state.intent, Some(Intent::Chart));
    assert_eq!(state.schema_context.as_deref(), Some(ORDERS_SCHEMA));
    let chart = state.final_chart.as_ref().expect("chart payload");
    assert_eq!(chart.chart_type, ChartType::Pie);

    let slices = chart.data.as_array().unwrap();
    assert_eq!(slices.len(), 2);
    let total: f64 = slices.iter().filter_map(|s| s["value"].as_f64()).sum();
    assert_eq!(total, 150.0);

    assert_eq!(tool.invocations(), 1);
    assert_eq!(state.output_count(), 1);
    assert_eq!(state.progress.current_state, StateName::Completed);
    assert_eq!(state.progress.percentage, 100);
}

#[tokio::test]
async fn test_chat_intent_gets_a_reply() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chat"),
        "Foobar is not something I can chart, but happy to talk about it.".to_string(),
    ]));
    let deps = deps(llm.clone(), None, Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("chart the foobar trend"), &deps, None).await;

    assert_eq!(state.intent, Some(Intent::Chat));
    assert!(state.final_chart.is_none());
    assert!(state.chat_reply.as_deref().unwrap().starts_with("Foobar"));
    assert_eq!(state.output_count(), 1);
    assert_eq!(llm.calls().len(), 2);
}

#[tokio::test]
async fn test_cte_query_ends_before_execution() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("bar", &["Revenue per region"]),
        sql("WITH totals AS (SELECT region, SUM(revenue) AS revenue FROM Orders GROUP BY region) SELECT * FROM totals"),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm, Some(tool.clone()), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("bar chart of revenue"), &deps, None).await;

    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].contains("forbidden WITH clause"));
    assert_eq!(tool.invocations(), 0);
    assert!(state.query_results.is_empty());
    assert_eq!(state.progress.current_state, StateName::Failed);
}

#[tokio::test]
async fn test_unknown_table_lists_available_tables() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("bar", &["Revenue per region"]),
        sql("SELECT region, SUM(amount) FROM Purchases GROUP BY region"),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let memory = memory_with_schema(ORDERS_SCHEMA).await;
    let deps = deps(llm.clone(), Some(tool.clone()), memory);

    let state = workflow::run(state("bar chart of purchases by region"), &deps, None).await;

    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].contains("\"Purchases\""));
    assert!(state.errors[0].contains("Available tables are: Orders"));
    assert_eq!(tool.invocations(), 0);
    assert_eq!(llm.prompts_containing(GENERATION_MARKER).len(), 1);
}

#[tokio::test]
async fn test_invalid_results_stop_after_three_attempts() {
    let mut script = vec![routing("chart"), plan("pie", &["Total revenue per region"])];
    for _ in 0..3 {
        script.push(sql(REVENUE_SQL));
        script.push(verdict(false, &["Only one region returned"]));
    }
    // Anything beyond the budget would consume these
    script.push(sql(REVENUE_SQL));
    script.push(verdict(true, &[]));

    let llm = Arc::new(ScriptedLlm::new(script));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm.clone(), Some(tool.clone()), Arc::new(InMemoryStore::new()));
    let observer = RecordingObserver::default();

    let state = workflow::run(state("pie of revenue by region"), &deps, Some(&observer)).await;

    assert_eq!(llm.prompts_containing(GENERATION_MARKER).len(), 3);
    assert_eq!(tool.invocations(), 3);
    assert_eq!(llm.remaining(), 2);
    assert_eq!(state.retry_count, state.max_retries);
    assert!(state.final_chart.is_none());
    assert_eq!(
        state.errors,
        vec!["Query validation failed after 3 attempts: Only one region returned".to_string()]
    );

    let retries: Vec<_> = observer
        .events()
        .into_iter()
        .filter(|p| p.current_state == StateName::Retrying)
        .map(|p| p.message)
        .collect();
    assert_eq!(
        retries,
        vec![
            "Retrying query generation (attempt 2/3)".to_string(),
            "Retrying query generation (attempt 3/3)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_retry_prompt_carries_previous_issues() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(false, &["Revenue column is null"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm.clone(), Some(tool), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue by region"), &deps, None).await;

    assert!(state.final_chart.is_some(), "{:?}", state.errors);
    let prompts = llm.prompts_containing(GENERATION_MARKER);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("RETRY CONTEXT"));
    assert!(prompts[1].contains("RETRY CONTEXT"));
    assert!(prompts[1].contains("Revenue column is null"));
    // A successful attempt keeps the spent budget
    assert_eq!(state.retry_count, 1);
}

#[tokio::test]
async fn test_schema_column_issue_triggers_guided_retry() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql("SELECT o.country, SUM(o.revenue) FROM Orders o GROUP BY o.country"),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let memory = memory_with_schema(ORDERS_SCHEMA).await;
    let deps = deps(llm.clone(), Some(tool.clone()), memory);

    let state = workflow::run(state("pie of revenue by region"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    assert!(state.final_chart.is_some());
    assert_eq!(tool.invocations(), 1);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.sql_queries[0].query, REVENUE_SQL);

    let prompts = llm.prompts_containing(GENERATION_MARKER);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Column 'country' not found in schema."));
}

#[tokio::test]
async fn test_persistent_schema_column_issue_is_terminal() {
    let bad = "SELECT o.country, SUM(o.revenue) FROM Orders o GROUP BY o.country";
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(bad),
        sql(bad),
        sql(bad),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let memory = memory_with_schema(ORDERS_SCHEMA).await;
    let deps = deps(llm.clone(), Some(tool.clone()), memory);

    let state = workflow::run(state("pie of revenue by country"), &deps, None).await;

    assert_eq!(llm.prompts_containing(GENERATION_MARKER).len(), 3);
    assert_eq!(tool.invocations(), 0);
    assert_eq!(state.retry_count, 3);
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].starts_with("I couldn't find these columns in your database schema: country"));
}

#[tokio::test]
async fn test_next_step_resets_retry_budget() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Orders per region", "Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(false, &["Too few rows"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm.clone(), Some(tool.clone()), Arc::new(InMemoryStore::new()));
    let observer = RecordingObserver::default();

    let state = workflow::run(state("pie of revenue by region"), &deps, Some(&observer)).await;

    assert_eq!(state.current_step, 1);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.sql_queries.len(), 2);
    assert_eq!(state.query_results.len(), 2);
    assert_eq!(state.validation_results.len(), 2);
    assert!(state.validation_results.iter().all(|v| v.is_valid));
    assert_eq!(tool.invocations(), 3);
    assert_eq!(state.output_count(), 1);
    assert!(observer
        .events()
        .iter()
        .any(|p| p.message == "Moving to query step 2/2"));
}

#[tokio::test]
async fn test_clarification_from_planner() {
    let clarify = json!({
        "clarificationNeeded": {
            "question": "Which metric should the chart show?",
            "options": ["revenue", "order count"]
        }
    })
    .to_string();
    let llm = Arc::new(ScriptedLlm::new([routing("chart"), clarify]));
    let deps = deps(llm, None, Arc::new(InMemoryStore::new()));
    let observer = RecordingObserver::default();

    let state = workflow::run(state("make a chart"), &deps, Some(&observer)).await;

    let clarification = state.clarification.as_ref().expect("clarification");
    assert_eq!(clarification.question, "Which metric should the chart show?");
    assert!(state.errors.is_empty());
    assert_eq!(state.output_count(), 1);

    let states: Vec<StateName> = observer.events().iter().map(|p| p.current_state).collect();
    assert_eq!(states.first(), Some(&StateName::Routing));
    assert!(states.contains(&StateName::Clarifying));
    assert_eq!(states.last(), Some(&StateName::Completed));
}

#[tokio::test]
async fn test_unreadable_plan_asks_to_rephrase() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        "Sure! I'd chart that as a pie.".to_string(),
    ]));
    let deps = deps(llm, None, Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("chart something"), &deps, None).await;

    assert!(state.errors.is_empty());
    let clarification = state.clarification.as_ref().unwrap();
    assert!(clarification.question.contains("rephrase"));
    assert_eq!(
        clarification.context.as_deref(),
        Some("I couldn't turn your request into a chart plan.")
    );
}

#[tokio::test]
async fn test_routing_failure_is_terminal() {
    let llm = Arc::new(ScriptedLlm::new(["I think you want a chart".to_string()]));
    let deps = deps(llm.clone(), None, Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue"), &deps, None).await;

    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].starts_with("Routing failed"));
    assert!(!state.errors[0].contains("JSON"));
    assert_eq!(llm.calls().len(), 1);
    assert_eq!(state.progress.current_state, StateName::Failed);
}

#[tokio::test]
async fn test_missing_sql_tool_is_terminal() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
    ]));
    let deps = deps(llm, None, Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue by region"), &deps, None).await;

    assert_eq!(state.errors, vec!["SQL query tool not available".to_string()]);
    assert!(state.validation_results.is_empty());
}

#[tokio::test]
async fn test_tool_error_is_surfaced_at_validation() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        // The model calls it fine; the execution error still wins
        verdict(true, &[]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(json!({"error": "no such column: revenue"})));
    let deps = deps(llm, Some(tool.clone()), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue by region"), &deps, None).await;

    assert_eq!(tool.invocations(), 3);
    let result = &state.query_results[0];
    assert_eq!(result.row_count, 0);
    assert_eq!(
        result.error.as_deref(),
        Some("SQL execution failed: no such column: revenue")
    );
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].starts_with("Query validation failed after 3 attempts"));
}

#[tokio::test]
async fn test_chart_generation_disabled_answers_by_chat() {
    let llm = Arc::new(ScriptedLlm::new([routing("chart"), "Charts are turned off.".to_string()]));
    let mut deps = deps(llm, None, Arc::new(InMemoryStore::new()));
    deps.options.enable_chart_generation = false;

    let state = workflow::run(state("pie of revenue"), &deps, None).await;

    assert_eq!(state.chat_reply.as_deref(), Some("Charts are turned off."));
    assert!(state.final_chart.is_none());
}

#[tokio::test]
async fn test_progress_reaches_completion_in_step_order() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm, Some(tool), Arc::new(InMemoryStore::new()));
    let observer = RecordingObserver::default();

    workflow::run(state("pie of revenue by region"), &deps, Some(&observer)).await;

    let states: Vec<StateName> = observer.events().iter().map(|p| p.current_state).collect();
    assert_eq!(
        states,
        vec![
            StateName::Routing,
            StateName::Planning,
            StateName::UnderstandingSchema,
            StateName::GeneratingQuery,
            StateName::ExecutingQuery,
            StateName::ValidatingResults,
            StateName::TransformingData,
            StateName::Completed,
        ]
    );
    let last: Value = serde_json::to_value(observer.events().last().unwrap()).unwrap();
    assert_eq!(last["percentage"], 100);
}

#[tokio::test]
async fn test_model_mapping_plan_shapes_the_chart() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Total revenue per region"]),
        sql(REVENUE_SQL),
        verdict(true, &[]),
        mapping_plan(json!({
            "fieldMappings": {"region": "id", "revenue": "value"},
            "sorting": [{"field": "revenue", "direction": "asc"}]
        })),
    ]));
    let tool = Arc::new(StubSqlTool::new(region_rows()));
    let deps = deps(llm.clone(), Some(tool), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue by region"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    assert_eq!(llm.remaining(), 0);
    assert_eq!(llm.prompts_containing("data transformation expert").len(), 1);
    let chart = state.final_chart.expect("chart payload");
    assert_eq!(
        chart.data,
        json!([{"id": "West", "value": 50}, {"id": "East", "value": 100}])
    );
    assert_eq!(
        chart.description.as_deref(),
        Some("Chart showing 2 data points with 2 field mappings")
    );
}

#[tokio::test]
async fn test_uppercase_weekly_query_is_filtered_per_series() {
    let weekly_sql = "SELECT product_id, DATE(OrderDate,'WEEKDAY 0','-6 DAYS') AS week_start, SUM(sales) AS sales FROM Orders GROUP BY 1, 2";
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("line", &["Weekly sales per product"]),
        sql(weekly_sql),
        verdict(true, &[]),
        mapping_plan(json!({
            "fieldMappings": {"week_start": "x", "sales": "y"},
            "filters": [{"field": "week_start", "operation": "equals", "value": "2024-01-08"}]
        })),
    ]));
    let tool = Arc::new(StubSqlTool::new(json!({"data": [
        {"product_id": "p1", "week_start": "2024-01-01", "sales": 3},
        {"product_id": "p2", "week_start": "2024-01-01", "sales": 4},
        {"product_id": "p1", "week_start": "2024-01-08", "sales": 5}
    ]})));
    let deps = deps(llm.clone(), Some(tool.clone()), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("line chart of weekly sales per product"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    assert_eq!(tool.invocations(), 1);
    assert_eq!(llm.remaining(), 0);
    let chart = state.final_chart.expect("chart payload");
    assert_eq!(chart.chart_type, ChartType::Line);
    assert_eq!(
        chart.data,
        json!([{"id": "p1", "data": [{"x": "2024-01-08", "y": 5}]}])
    );
}

#[tokio::test]
async fn test_non_ascii_digit_labels_reach_the_chart() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("pie", &["Revenue per label"]),
        sql("SELECT label, SUM(revenue) AS revenue FROM Orders GROUP BY label"),
        verdict(true, &[]),
    ]));
    let tool = Arc::new(StubSqlTool::new(json!({"data": [
        {"label": "٢٠٢٤-٠٣-١٥", "revenue": 10},
        {"label": "٢٠٢٤-٠٣-١٦", "revenue": 5}
    ]})));
    let deps = deps(llm, Some(tool), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("pie of revenue by label"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    let chart = state.final_chart.expect("chart payload");
    assert_eq!(
        chart.data,
        json!([{"id": "٢٠٢٤-٠٣-١٥", "value": 10}, {"id": "٢٠٢٤-٠٣-١٦", "value": 5}])
    );
}

#[tokio::test]
async fn test_treemap_without_name_mapping_is_corrected() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("treemap", &["Revenue totals"]),
        sql("SELECT SUM(revenue) AS total FROM Orders GROUP BY region"),
        verdict(true, &[]),
        mapping_plan(json!({"fieldMappings": {"total": "value"}})),
    ]));
    let tool = Arc::new(StubSqlTool::new(json!({"data": [{"total": 1}, {"total": 2}]})));
    let deps = deps(llm, Some(tool), Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("treemap of revenue totals"), &deps, None).await;

    assert!(state.errors.is_empty(), "{:?}", state.errors);
    let chart = state.final_chart.expect("chart payload");
    assert_eq!(
        chart.data,
        json!({"name": "root", "value": 3, "loc": 3, "children": [
            {"name": "Item 1", "value": 1, "loc": 1},
            {"name": "Item 2", "value": 2, "loc": 2}
        ]})
    );
    assert_eq!(state.progress.current_state, StateName::Completed);
}

#[tokio::test]
async fn test_unusable_generation_reply_is_not_echoed() {
    let llm = Arc::new(ScriptedLlm::new([
        routing("chart"),
        plan("bar", &["Revenue per region"]),
        "I would group the orders by region.".to_string(),
    ]));
    let deps = deps(llm, None, Arc::new(InMemoryStore::new()));

    let state = workflow::run(state("bar chart of revenue"), &deps, None).await;

    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].starts_with("Query generation failed: I couldn't produce"));
    assert!(!state.errors[0].contains("JSON"));
    assert_eq!(state.progress.current_state, StateName::Failed);
}
