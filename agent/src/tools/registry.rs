//! Tool trait and registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::errors::AgentError;

/// An invocable external capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Invoke with a text payload. Tool-level failures are reported inside the
    /// returned payload; `Err` is reserved for failures to reach the tool.
    async fn invoke(&self, input: &str) -> Result<String, AgentError>;
}

/// Name-keyed tool lookup
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
