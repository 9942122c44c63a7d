//! Workflow steps
//!
//! Every step reads the state, performs its work and returns a
//! `StateUpdate`. Expected failures are recorded in the update, never
//! returned as `Err`.

use std::sync::Arc;

use crate::app::options::WorkflowOptions;
use crate::llm::LlmClient;
use crate::memory::MemoryStore;
use crate::tools::ToolRegistry;
use crate::workflow::progress::ProgressObserver;

pub mod chatting;
pub mod clarifying;
pub mod executing_query;
pub mod generating_query;
pub mod planning;
pub mod routing;
pub mod transforming_data;
pub mod understanding_schema;
pub mod validating_results;

/// Collaborators shared by every run
#[derive(Clone)]
pub struct NodeDeps {
    pub llm: Arc<dyn LlmClient>,
    pub memory: Arc<dyn MemoryStore>,
    pub tools: Arc<ToolRegistry>,
    pub options: WorkflowOptions,
}

/// Per-run view handed to steps
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub deps: &'a NodeDeps,
    pub observer: Option<&'a dyn ProgressObserver>,
}

impl<'a> NodeContext<'a> {
    pub fn new(deps: &'a NodeDeps, observer: Option<&'a dyn ProgressObserver>) -> Self {
        Self { deps, observer }
    }

    /// Forward streamed reply text
    pub fn content(&self, chunk: &str) {
        if let Some(observer) = self.observer {
            observer.on_content(chunk);
        }
    }
}
