//! Workflow state machine
//!
//! Drives one run from routing to the end marker. Each transition is a pure
//! function of the current state; steps never pick their successor.

use std::fmt;

use tracing::{debug, info, warn};

use crate::app::options::WorkflowOptions;
use crate::models::{AgentState, Intent, Progress, StateName};
use crate::workflow::nodes::{
    chatting, clarifying, executing_query, generating_query, planning, routing,
    transforming_data, understanding_schema, validating_results, NodeContext, NodeDeps,
};
use crate::workflow::progress::ProgressObserver;
use crate::workflow::update::StateUpdate;

/// Workflow graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Routing,
    Planning,
    UnderstandingSchema,
    GeneratingQuery,
    ExecutingQuery,
    ValidatingResults,
    TransformingData,
    Clarifying,
    Chatting,
    NextStepUpdater,
    RetryUpdater,
    End,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Routing => "routing",
            Step::Planning => "planning",
            Step::UnderstandingSchema => "understanding_schema",
            Step::GeneratingQuery => "generating_query",
            Step::ExecutingQuery => "executing_query",
            Step::ValidatingResults => "validating_results",
            Step::TransformingData => "transforming_data",
            Step::Clarifying => "clarifying",
            Step::Chatting => "chatting",
            Step::NextStepUpdater => "next_step_updater",
            Step::RetryUpdater => "retry_updater",
            Step::End => "end",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successor of `step` given the state after it ran
pub fn next_step(step: Step, state: &AgentState, options: &WorkflowOptions) -> Step {
    match step {
        Step::Routing => after_routing(state, options),
        Step::Planning => after_planning(state),
        Step::UnderstandingSchema => Step::GeneratingQuery,
        Step::GeneratingQuery => after_generating(state),
        Step::ExecutingQuery if state.has_errors() => Step::End,
        Step::ExecutingQuery => Step::ValidatingResults,
        Step::ValidatingResults => after_validating(state),
        Step::NextStepUpdater | Step::RetryUpdater => Step::GeneratingQuery,
        Step::TransformingData | Step::Clarifying | Step::Chatting | Step::End => Step::End,
    }
}

fn after_routing(state: &AgentState, options: &WorkflowOptions) -> Step {
    if state.has_errors() {
        return Step::End;
    }
    match state.intent {
        Some(Intent::Chart) if options.enable_chart_generation => Step::Planning,
        _ => Step::Chatting,
    }
}

fn after_planning(state: &AgentState) -> Step {
    if state.clarification.is_some() {
        Step::Clarifying
    } else if state.has_errors() {
        Step::End
    } else {
        Step::UnderstandingSchema
    }
}

fn after_generating(state: &AgentState) -> Step {
    if state.has_errors() {
        Step::End
    } else if state.retry_requested {
        Step::RetryUpdater
    } else {
        Step::ExecutingQuery
    }
}

fn after_validating(state: &AgentState) -> Step {
    if state.has_errors() {
        return Step::End;
    }
    match state.current_validation() {
        Some(validation) if validation.is_valid => {
            if state.has_more_steps() {
                Step::NextStepUpdater
            } else {
                Step::TransformingData
            }
        }
        Some(_) if state.can_retry() => Step::RetryUpdater,
        _ => Step::End,
    }
}

/// Advance the cursor to the next plan step with a fresh retry budget
fn next_step_updater(state: &AgentState) -> StateUpdate {
    let next = state.current_step + 1;
    info!("Advancing to query step {}/{}", next + 1, state.query_plan.len());
    StateUpdate {
        current_step: Some(next),
        retry_count: Some(0),
        retry_requested: Some(false),
        progress: Some(Progress::new(
            StateName::GeneratingQuery,
            format!("Moving to query step {}/{}", next + 1, state.query_plan.len()),
        )),
        ..Default::default()
    }
}

/// Spend one unit of the current step's retry budget
fn retry_updater(state: &AgentState) -> StateUpdate {
    let retry_count = state.retry_count + 1;
    warn!(
        "Retrying query step {} (retry {}/{})",
        state.current_step + 1,
        retry_count,
        state.max_retries
    );
    StateUpdate {
        retry_count: Some(retry_count),
        retry_requested: Some(false),
        progress: Some(Progress::new(
            StateName::Retrying,
            format!(
                "Retrying query generation (attempt {}/{})",
                retry_count + 1,
                state.max_retries
            ),
        )),
        ..Default::default()
    }
}

async fn execute_step(step: Step, state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    match step {
        Step::Routing => routing::run(state, ctx).await,
        Step::Planning => planning::run(state, ctx).await,
        Step::UnderstandingSchema => understanding_schema::run(state, ctx).await,
        Step::GeneratingQuery => generating_query::run(state, ctx).await,
        Step::ExecutingQuery => executing_query::run(state, ctx).await,
        Step::ValidatingResults => validating_results::run(state, ctx).await,
        Step::TransformingData => transforming_data::run(state, ctx).await,
        Step::Clarifying => clarifying::run(state),
        Step::Chatting => chatting::run(state, ctx).await,
        Step::NextStepUpdater => next_step_updater(state),
        Step::RetryUpdater => retry_updater(state),
        Step::End => StateUpdate::default(),
    }
}

/// Run the workflow from routing until the end marker
pub async fn run(
    mut state: AgentState,
    deps: &NodeDeps,
    observer: Option<&dyn ProgressObserver>,
) -> AgentState {
    let ctx = NodeContext::new(deps, observer);
    let mut step = Step::Routing;
    let mut path: Vec<Step> = Vec::new();

    while step != Step::End {
        debug!("Executing step {}", step);
        let update = execute_step(step, &state, &ctx).await;
        state.apply(update);
        if let Some(observer) = observer {
            observer.on_progress(&state.progress);
        }
        path.push(step);
        step = next_step(step, &state, &deps.options);
    }

    let terminal = if state.has_errors() {
        Progress::new(StateName::Failed, "Workflow failed")
    } else {
        Progress::new(StateName::Completed, "Workflow completed")
    };
    if state.progress != terminal {
        state.progress = terminal;
        if let Some(observer) = observer {
            observer.on_progress(&state.progress);
        }
    }

    info!(
        "Workflow finished as {} after {} steps: {}",
        state.progress.current_state,
        path.len(),
        path.iter().map(Step::as_str).collect::<Vec<_>>().join(" -> ")
    );
    state
}
