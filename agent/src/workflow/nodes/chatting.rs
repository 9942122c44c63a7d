//! Conversational replies

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::llm::{ChatMessage, CompletionOptions};
use crate::models::{AgentState, Progress, StateName};
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const CHAT_FAILED: &str = "Chatting failed: I couldn't generate a reply right now. Please try again.";

const CHAT_PROMPT: &str = "You are a helpful AI assistant. You have access to tools and memory.";

/// System prompt, recent turns from memory, then the request
async fn chat_context(state: &AgentState, ctx: &NodeContext<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(CHAT_PROMPT)];

    match ctx
        .deps
        .memory
        .get_recent_messages(&state.user_id, &state.session_id, ctx.deps.options.history_limit)
        .await
    {
        Ok(turns) => {
            debug!("Loaded {} turns of chat context", turns.len());
            for turn in turns {
                messages.push(ChatMessage::user(turn.user_message));
                messages.push(ChatMessage::assistant(turn.assistant_response));
            }
        }
        Err(e) => warn!("Chat history unavailable: {}", e),
    }

    messages.push(ChatMessage::user(state.user_request.clone()));
    messages
}

/// Answer the request as free text, streaming chunks to the observer
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    info!("Generating chat reply for session {}", state.session_id);
    let messages = chat_context(state, ctx).await;

    let replied = async {
        let mut stream = ctx
            .deps
            .llm
            .stream(&messages, CompletionOptions::default())
            .await?;
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            ctx.content(&chunk);
            reply.push_str(&chunk);
        }
        Ok::<_, AgentError>(reply)
    }
    .await;

    match replied {
        Ok(reply) => {
            info!("Chat reply ready ({} chars)", reply.len());
            StateUpdate {
                chat_reply: Some(reply.clone()),
                progress: Some(Progress::new(StateName::Completed, "Response ready!")),
                messages: vec![ChatMessage::assistant(reply)],
                ..Default::default()
            }
        }
        Err(e) => {
            warn!("Chat completion failed: {}", e);
            error!("Chatting failed for session {}", state.session_id);
            StateUpdate::failed(
                CHAT_FAILED,
                Progress::new(StateName::Failed, "Could not generate a reply"),
            )
        }
    }
}
