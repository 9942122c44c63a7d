//! Chart payload construction

use tracing::{error, info};

use crate::charts;
use crate::errors::AgentError;
use crate::models::{AgentState, Progress, StateName};
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

/// Turn every step's rows into the final chart payload
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    info!(
        "Transforming {} rows from {} results",
        state.total_rows(),
        state.query_results.len()
    );

    let transformed = match state.chart_type {
        Some(chart_type) => {
            charts::transform(ctx.deps.llm.as_ref(), &state.query_results, chart_type).await
        }
        None => Err(AgentError::TransformError("no chart type was planned".to_string())),
    };

    match transformed {
        Ok(chart) => {
            info!("Built {} chart '{}'", chart.chart_type, chart.title.as_deref().unwrap_or(""));
            StateUpdate {
                final_chart: Some(chart),
                progress: Some(Progress::new(
                    StateName::TransformingData,
                    "Chart data ready",
                )),
                ..Default::default()
            }
        }
        Err(e) => {
            error!("Data transformation failed: {}", e);
            StateUpdate::failed(
                format!("Data transformation failed: {}", e),
                Progress::new(StateName::Failed, "Could not build the chart"),
            )
        }
    }
}
