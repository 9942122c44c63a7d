//! Single-request application run

use chart_api::models::{AgentRequest, AgentResponse, ProgressEvent};
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::AgentError;

/// Initialize the application and answer one request. In stream mode every
/// progress event is handed to `on_event` as it arrives.
pub async fn run(
    options: AppOptions,
    request: AgentRequest,
    stream: bool,
    on_event: impl Fn(&ProgressEvent),
) -> Result<AgentResponse, AgentError> {
    info!("Initializing chartflow...");
    let app_state = AppState::init(&options).await?;

    if !stream {
        return app_state.orchestrator.process_request(request).await;
    }

    let (mut events, handle) = app_state.orchestrator.stream_request(request)?;
    while let Some(event) = events.recv().await {
        on_event(&event);
    }

    handle.await.map_err(|e| {
        error!("Workflow task failed: {}", e);
        AgentError::WorkflowError(e.to_string())
    })
}
