//! Intent classification

use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::llm::parser::{parse_json_value, require_fields};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::models::{AgentState, Intent, Progress, StateName};
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const ROUTING_FAILED: &str =
    "Routing failed: I couldn't work out what you are asking for. Please try rephrasing your request.";

const ROUTING_PROMPT: &str = r#"You are an expert at understanding user requests. Look at the user's latest message in the context of the conversation history. Classify the user's intent for the LATEST message into one of two categories: "chart" or "chat".

Your response must be a valid JSON object with the following structure:
{
  "intent": "chart" | "chat",
  "reasoning": "A brief explanation for your choice."
}

Guidelines:
- "chart": any request that involves creating a chart, graph or visualization, including short follow-ups like "make it a line chart".
- "chat": general conversation, questions, or requests that don't involve creating a chart.

If your last message asked the user about a chart and the user's reply answers it, classify the intent as "chart"."#;

fn parse_intent(reply: &str) -> Result<Intent, AgentError> {
    let value = parse_json_value(reply, "routing")?;
    require_fields(&value, &["intent"], "routing")?;
    let intent = match value["intent"].as_str().map(str::to_lowercase).as_deref() {
        Some("chart") => Intent::Chart,
        Some("clarify") => Intent::Clarify,
        _ => Intent::Chat,
    };
    Ok(intent)
}

/// Classify the latest message as a chart or chat request
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    info!("Routing request for session {}", state.session_id);
    let progress = Progress::new(StateName::Routing, "Classifying your request...");

    let mut messages = vec![ChatMessage::system(ROUTING_PROMPT)];
    messages.extend(state.messages.iter().cloned());

    let classified = async {
        let reply = ctx
            .deps
            .llm
            .complete(&messages, CompletionOptions::with_temperature(0.0))
            .await?;
        let intent = parse_intent(&reply)?;
        Ok::<_, AgentError>((intent, reply))
    }
    .await;

    match classified {
        Ok((intent, reply)) => {
            info!("Request classified as {:?}", intent);
            StateUpdate {
                intent: Some(intent),
                progress: Some(progress),
                messages: vec![ChatMessage::assistant(reply)],
                ..Default::default()
            }
        }
        Err(e) => {
            warn!("Routing reply unusable: {}", e);
            error!("Routing failed for session {}", state.session_id);
            StateUpdate::failed(
                ROUTING_FAILED,
                Progress::new(StateName::Failed, "Could not classify the request"),
            )
        }
    }
}
