//! Completion client trait

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::errors::AgentError;
use crate::llm::message::ChatMessage;

/// Stream of completion text chunks
pub type TextStream = BoxStream<'static, Result<String, AgentError>>;

/// Per-call overrides of the client defaults
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum completion tokens
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// Text-in/text-out completion service
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete the conversation and return the full reply
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, AgentError>;

    /// Complete the conversation as a stream of chunks
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<TextStream, AgentError> {
        let text = self.complete(messages, options).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}
