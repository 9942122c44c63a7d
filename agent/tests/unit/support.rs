//! Scripted collaborators for workflow tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use chartflow::app::options::WorkflowOptions;
use chartflow::errors::AgentError;
use chartflow::llm::{ChatMessage, CompletionOptions, LlmClient};
use chartflow::memory::{InMemoryStore, MemoryStore};
use chartflow::models::{AgentState, Progress};
use chartflow::tools::{Tool, ToolRegistry, SQL_QUERY_TOOL};
use chartflow::workflow::{NodeDeps, ProgressObserver};

/// Marker present in every query generation prompt
pub const GENERATION_MARKER: &str = "expert SQL query writer";

/// Replies with canned completions in order, failing once the script runs out
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose system prompt contains `needle`
    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|messages| messages.first().map(|m| m.content.clone()))
            .filter(|prompt| prompt.contains(needle))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> Result<String, AgentError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::LlmError("no scripted reply left".to_string()))
    }
}

/// SQL tool answering every query with the same body
pub struct StubSqlTool {
    reply: String,
    invocations: AtomicUsize,
}

impl StubSqlTool {
    pub fn new(reply: Value) -> Self {
        Self {
            reply: reply.to_string(),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for StubSqlTool {
    fn name(&self) -> &str {
        SQL_QUERY_TOOL
    }

    fn description(&self) -> &str {
        "stub"
    }

    async fn invoke(&self, _input: &str) -> Result<String, AgentError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Records every progress notification
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Progress>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Progress> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, progress: &Progress) {
        self.events.lock().unwrap().push(progress.clone());
    }
}

pub fn deps(
    llm: Arc<ScriptedLlm>,
    tool: Option<Arc<StubSqlTool>>,
    memory: Arc<InMemoryStore>,
) -> NodeDeps {
    let mut tools = ToolRegistry::new();
    if let Some(tool) = tool {
        tools.register(tool);
    }
    NodeDeps {
        llm,
        memory,
        tools: Arc::new(tools),
        options: WorkflowOptions::default(),
    }
}

pub async fn memory_with_schema(schema: &str) -> Arc<InMemoryStore> {
    let memory = Arc::new(InMemoryStore::new());
    memory
        .store_vector_memory(schema, meta(json!({"type": "technical_documentation"})))
        .await
        .unwrap();
    memory
}

pub fn state(request: &str) -> AgentState {
    AgentState::new("u1", "s1", request, 3).with_messages(vec![ChatMessage::user(request)])
}

pub fn meta(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

// Canned model replies

pub fn routing(intent: &str) -> String {
    json!({"intent": intent, "reasoning": "scripted"}).to_string()
}

pub fn plan(chart_type: &str, steps: &[&str]) -> String {
    let query_plan: Vec<Value> = steps
        .iter()
        .enumerate()
        .map(|(i, description)| {
            json!({
                "step": i + 1,
                "description": description,
                "tables": ["Orders"],
                "expectedOutput": "region, revenue"
            })
        })
        .collect();
    json!({
        "chartType": chart_type,
        "dataRequirements": [
            {"name": "region", "description": "slice label", "required": true, "dataType": "categorical"}
        ],
        "queryPlan": query_plan
    })
    .to_string()
}

pub fn sql(query: &str) -> String {
    json!({"tablesUsed": ["Orders"], "query": query, "explanation": "scripted"}).to_string()
}

pub fn verdict(valid: bool, issues: &[&str]) -> String {
    json!({"isValid": valid, "issues": issues, "suggestions": []}).to_string()
}

pub fn region_rows() -> Value {
    json!({"data": [
        {"region": "East", "revenue": 100},
        {"region": "West", "revenue": 50}
    ]})
}

pub const ORDERS_SCHEMA: &str = "Orders(region, revenue)";

pub const REVENUE_SQL: &str = "SELECT region, SUM(revenue) AS revenue FROM Orders GROUP BY region";

pub fn mapping_plan(plan: Value) -> String {
    plan.to_string()
}
