//! Memory store contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;

/// Largest result count a vector query may ask for
pub const MAX_VECTOR_LIMIT: usize = 20;

/// One stored exchange between the user and the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: String,
    pub session_id: String,
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
}

/// A retrievable document with free-form metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

/// Vector query options
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Metadata equality filter, every entry must match
    pub filter: Map<String, Value>,

    /// Maximum documents returned, clamped to `1..=MAX_VECTOR_LIMIT`
    pub limit: usize,

    /// Minimum similarity score
    pub score_threshold: Option<f32>,
}

impl Default for VectorQuery {
    fn default() -> Self {
        Self {
            filter: Map::new(),
            limit: 5,
            score_threshold: None,
        }
    }
}

impl VectorQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(key.to_string(), value.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_VECTOR_LIMIT)
    }
}

/// Short-term chat history plus long-term document retrieval
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Most recent turns for the session, oldest first
    async fn get_recent_messages(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, AgentError>;

    /// Documents most similar to `text` that pass the query filter
    async fn query_vector_memory(
        &self,
        text: &str,
        query: VectorQuery,
    ) -> Result<Vec<Document>, AgentError>;

    /// Append one exchange to the session history
    async fn store_short_term_memory(
        &self,
        user_id: &str,
        session_id: &str,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<(), AgentError>;

    /// Add a document to long-term memory
    async fn store_vector_memory(
        &self,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), AgentError>;
}
