//! OpenAI-compatible completion gateway
//!
//! Wraps `/chat/completions` with input sanitizing, response redaction,
//! bounded retries with backoff and an optional fallback model.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::llm::client::{CompletionOptions, LlmClient, TextStream};
use crate::llm::message::{ChatMessage, Role};
use crate::utils::{calc_exp_backoff, truncate_chars, CooldownOptions};

/// Longest user message forwarded to the model, in characters
pub const MAX_INPUT_CHARS: usize = 10_000;

static ESCAPED_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[nrt]").unwrap());

static INJECTION_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore previous instructions",
        r"(?i)disregard all prior",
        r"(?i)forget everything",
        r"(?i)new instructions:",
        r"(?i)system:",
        r"(?i)assistant:",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static RESTRICTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|secret|key|token|api_key|apikey)\s*[:=]\s*[\w\-]+").unwrap()
});

/// A credential key at the end of streamed text whose value may still be in flight
static TRAILING_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|secret|key|token|api_key|apikey)\s*(?:[:=]\s*)?$").unwrap()
});

/// Gateway options
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Primary model
    pub model: String,

    /// Model tried after the primary model exhausts its attempts
    pub fallback_model: Option<String>,

    /// Default temperature
    pub temperature: f32,

    /// Default maximum completion tokens
    pub max_tokens: u32,

    /// Attempts per model
    pub max_attempts: u32,

    /// Delay between attempts
    pub cooldown: CooldownOptions,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            fallback_model: None,
            temperature: 0.7,
            max_tokens: 2000,
            max_attempts: 3,
            cooldown: CooldownOptions::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion gateway
pub struct LlmGateway {
    http: HttpClient,
    options: GatewayOptions,
}

impl LlmGateway {
    /// Create a gateway over an HTTP client pointed at the API base URL
    pub fn new(http: HttpClient, options: GatewayOptions) -> Self {
        info!(
            "LLM gateway initialized (model: {}, fallback: {})",
            options.model,
            options.fallback_model.as_deref().unwrap_or("none")
        );
        Self { http, options }
    }

    fn models(&self) -> Vec<&str> {
        let mut models = vec![self.options.model.as_str()];
        if let Some(fallback) = self.options.fallback_model.as_deref() {
            models.push(fallback);
        }
        models
    }

    async fn request_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, AgentError> {
        let body = CompletionRequest {
            model,
            messages,
            temperature: options.temperature.unwrap_or(self.options.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.options.max_tokens),
            stream: false,
        };
        let response: CompletionResponse = self.http.post("/chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::LlmError(format!("{} returned no content", model)))
    }
}

#[async_trait]
impl LlmClient for LlmGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, AgentError> {
        let messages = sanitize_messages(messages);
        let started = std::time::Instant::now();
        let mut last_error = None;

        for model in self.models() {
            for attempt in 0..self.options.max_attempts.max(1) {
                debug!(
                    "Requesting completion from {} (attempt {}, {} messages)",
                    model,
                    attempt + 1,
                    messages.len()
                );
                match self.request_once(model, &messages, options).await {
                    Ok(content) => {
                        let content = redact_restricted(&content);
                        info!(
                            "Completion from {} succeeded in {:?} ({} chars)",
                            model,
                            started.elapsed(),
                            content.len()
                        );
                        return Ok(content);
                    }
                    Err(e) => {
                        warn!("Completion from {} failed: {}", model, e);
                        last_error = Some(e);
                        if attempt + 1 < self.options.max_attempts {
                            tokio::time::sleep(calc_exp_backoff(&self.options.cooldown, attempt))
                                .await;
                        }
                    }
                }
            }
            error!("Model {} exhausted its attempts", model);
        }

        Err(AgentError::LlmError(format!(
            "All models failed: {}",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string())
        )))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<TextStream, AgentError> {
        let sanitized = sanitize_messages(messages);
        let body = CompletionRequest {
            model: &self.options.model,
            messages: &sanitized,
            temperature: options.temperature.unwrap_or(self.options.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.options.max_tokens),
            stream: true,
        };

        let response = match self.http.post_raw("/chat/completions", &body).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Streaming request failed ({}), falling back to a single completion", e);
                let text = self.complete(messages, options).await?;
                return Ok(stream::once(async move { Ok(text) }).boxed());
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<Result<String, AgentError>>();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = StreamDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        if tx.send(Err(AgentError::HttpError(e))).is_err() {
                            debug!("Stream consumer gone before the transport error was delivered");
                        }
                        return;
                    }
                };
                if let Some(text) = decoder.feed(&chunk) {
                    if tx.send(Ok(text)).is_err() {
                        debug!("Stream consumer gone, dropping the rest of the completion");
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }

            if let Some(text) = decoder.finish() {
                if tx.send(Ok(text)).is_err() {
                    debug!("Stream consumer gone before the final text");
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Incremental decoder for a server-sent completion stream
///
/// Network chunks are split into lines before UTF-8 decoding. Decoded text is
/// held back after its last whitespace, and before a trailing credential key,
/// so redaction always sees a whole assignment.
#[derive(Debug, Default)]
struct StreamDecoder {
    bytes: Vec<u8>,
    pending: String,
    done: bool,
}

impl StreamDecoder {
    /// Feed one chunk and return the text that is safe to emit
    fn feed(&mut self, chunk: &[u8]) -> Option<String> {
        if self.done {
            return None;
        }
        self.bytes.extend_from_slice(chunk);
        while let Some(end) = self.bytes.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=end).collect();
            self.decode_line(&line);
            if self.done {
                break;
            }
        }
        self.take_ready()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Release everything still buffered once the stream ends
    fn finish(&mut self) -> Option<String> {
        if !self.done && !self.bytes.is_empty() {
            let line = std::mem::take(&mut self.bytes);
            self.decode_line(&line);
        }
        if self.pending.is_empty() {
            return None;
        }
        Some(redact_restricted(&std::mem::take(&mut self.pending)))
    }

    fn decode_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
            return;
        };
        if data == "[DONE]" {
            self.done = true;
        } else if let Some(delta) = parse_stream_delta(data) {
            self.pending.push_str(&delta);
        }
    }

    fn take_ready(&mut self) -> Option<String> {
        let mut cut = self
            .pending
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        if let Some(key) = TRAILING_KEY.find(&self.pending[..cut]) {
            cut = key.start();
        }
        if cut == 0 {
            return None;
        }
        let rest = self.pending.split_off(cut);
        let ready = std::mem::replace(&mut self.pending, rest);
        Some(redact_restricted(&ready))
    }
}

fn parse_stream_delta(data: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(data).ok()?;
    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn sanitize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::User => ChatMessage::user(sanitize_input(&message.content)),
            _ => message.clone(),
        })
        .collect()
}

/// Strip escaped whitespace and prompt-injection markers, then cap the length
pub fn sanitize_input(input: &str) -> String {
    let mut sanitized = ESCAPED_WHITESPACE.replace_all(input, " ").to_string();
    for marker in INJECTION_MARKERS.iter() {
        sanitized = marker.replace_all(&sanitized, "").to_string();
    }
    if sanitized.chars().count() > MAX_INPUT_CHARS {
        sanitized = format!("{}... [truncated]", truncate_chars(&sanitized, MAX_INPUT_CHARS));
    }
    sanitized.trim().to_string()
}

/// Replace credential-looking assignments with a placeholder
pub fn redact_restricted(response: &str) -> String {
    if RESTRICTED.is_match(response) {
        warn!("Filtered restricted content from model reply");
        RESTRICTED.replace_all(response, "[REDACTED]").to_string()
    } else {
        response.to_string()
    }
}
