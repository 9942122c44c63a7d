//! Process-local memory store
//!
//! Conversation turns are kept per (user, session), capped at
//! [`MAX_TURNS_PER_SESSION`]. Document similarity is a token-overlap score,
//! which is enough to rank schema documentation without an embedding service.
//! History can optionally be snapshotted to a JSON file so that separate CLI
//! invocations share a session.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::memory::store::{ConversationTurn, Document, MemoryStore, VectorQuery};

/// Turns retained per session
pub const MAX_TURNS_PER_SESSION: usize = 100;

type SessionKey = (String, String);

/// In-memory implementation of [`MemoryStore`]
#[derive(Default)]
pub struct InMemoryStore {
    turns: RwLock<HashMap<SessionKey, VecDeque<ConversationTurn>>>,
    documents: RwLock<Vec<Document>>,
    snapshot: Option<File>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose history is loaded from and written back to `file`
    pub async fn with_snapshot(file: File) -> Result<Self, AgentError> {
        let store = Self {
            snapshot: Some(file.clone()),
            ..Default::default()
        };

        if file.exists().await {
            let turns: Vec<ConversationTurn> = file.read_json().await?;
            let mut map = store.turns.write().await;
            for turn in turns {
                let key = (turn.user_id.clone(), turn.session_id.clone());
                push_capped(map.entry(key).or_default(), turn);
            }
            info!("Loaded {} sessions from {}", map.len(), file.path().display());
            drop(map);
        }

        Ok(store)
    }

    /// Number of stored documents
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    async fn persist(&self) -> Result<(), AgentError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let turns: Vec<ConversationTurn> = {
            let map = self.turns.read().await;
            let mut all: Vec<ConversationTurn> = map.values().flatten().cloned().collect();
            all.sort_by_key(|turn| turn.timestamp);
            all
        };
        file.write_json(&turns).await
    }
}

fn push_capped(turns: &mut VecDeque<ConversationTurn>, turn: ConversationTurn) {
    turns.push_back(turn);
    while turns.len() > MAX_TURNS_PER_SESSION {
        turns.pop_front();
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query tokens present in the document
fn similarity(query_tokens: &HashSet<String>, content: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens = tokenize(content);
    let hits = query_tokens.iter().filter(|t| doc_tokens.contains(*t)).count();
    hits as f32 / query_tokens.len() as f32
}

/// A filter entry matches when the metadata value is equal, or when the
/// metadata value is an array containing the filter value
fn matches_filter(metadata: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| match metadata.get(key) {
        Some(actual @ Value::Array(items)) => items.contains(expected) || actual == expected,
        Some(actual) => actual == expected,
        None => false,
    })
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get_recent_messages(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, AgentError> {
        let map = self.turns.read().await;
        let key = (user_id.to_string(), session_id.to_string());
        let turns = match map.get(&key) {
            Some(turns) => turns,
            None => return Ok(Vec::new()),
        };
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.iter().skip(skip).cloned().collect())
    }

    async fn query_vector_memory(
        &self,
        text: &str,
        query: VectorQuery,
    ) -> Result<Vec<Document>, AgentError> {
        let query_tokens = tokenize(text);
        let documents = self.documents.read().await;

        let mut scored: Vec<(f32, usize)> = documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| matches_filter(&doc.metadata, &query.filter))
            .map(|(idx, doc)| (similarity(&query_tokens, &doc.page_content), idx))
            .filter(|(score, _)| query.score_threshold.map_or(true, |min| *score >= min))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.effective_limit());

        debug!(
            "Vector query '{}' matched {} documents (filter keys: {:?})",
            crate::utils::preview(text, 50),
            scored.len(),
            query.filter.keys().collect::<Vec<_>>()
        );

        Ok(scored
            .into_iter()
            .map(|(_, idx)| documents[idx].clone())
            .collect())
    }

    async fn store_short_term_memory(
        &self,
        user_id: &str,
        session_id: &str,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<(), AgentError> {
        {
            let mut map = self.turns.write().await;
            let key = (user_id.to_string(), session_id.to_string());
            push_capped(
                map.entry(key).or_default(),
                ConversationTurn {
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    user_message: user_message.to_string(),
                    assistant_response: assistant_response.to_string(),
                    timestamp: chrono::Utc::now(),
                },
            );
        }

        if let Err(e) = self.persist().await {
            warn!("Failed to write memory snapshot: {}", e);
            return Err(AgentError::MemoryError(e.to_string()));
        }
        debug!("Stored turn for {}/{}", user_id, session_id);
        Ok(())
    }

    async fn store_vector_memory(
        &self,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), AgentError> {
        let mut metadata = metadata;
        metadata.insert(
            "timestamp".to_string(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        self.documents
            .write()
            .await
            .push(Document::new(content, metadata));
        Ok(())
    }
}
