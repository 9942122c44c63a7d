//! Application state management

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::app::options::AppOptions;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::llm::gateway::LlmGateway;
use crate::llm::LlmClient;
use crate::memory::{InMemoryStore, MemoryStore};
use crate::tools::{SqlQueryTool, ToolRegistry};
use crate::workflow::NodeDeps;

/// Schema documentation extensions picked up from the schema directory
const SCHEMA_EXTENSIONS: &[&str] = &["md", "txt"];

/// Metadata stored with every schema document
pub fn schema_metadata(source: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("type".to_string(), json!("technical_documentation"));
    metadata.insert("category".to_string(), json!("system_documentation"));
    metadata.insert("tags".to_string(), json!(["schema"]));
    metadata.insert("source".to_string(), json!(source));
    metadata
}

/// Main application state
pub struct AppState {
    /// Memory store shared by every run
    pub memory: Arc<InMemoryStore>,

    /// Request façade
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Build the collaborators and seed schema documentation
    pub async fn init(options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let llm_http = HttpClient::new(options.llm.base_url.as_str(), options.llm.timeout)?
            .with_bearer(options.llm.api_key.clone());
        let llm: Arc<dyn LlmClient> =
            Arc::new(LlmGateway::new(llm_http, options.llm.gateway.clone()));

        let sql_http = HttpClient::new(options.sql_tool.base_url.as_str(), options.sql_tool.timeout)?;
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SqlQueryTool::new(
            sql_http,
            options.sql_tool.database.clone(),
        )));

        let memory = Arc::new(InMemoryStore::with_snapshot(options.layout.memory_file()).await?);
        let seeded = seed_schema_docs(memory.as_ref(), &schema_files(options).await).await;
        info!(
            "Seeded {} schema documents ({} held in memory)",
            seeded,
            memory.document_count().await
        );

        let deps = NodeDeps {
            llm,
            memory: memory.clone(),
            tools: Arc::new(tools),
            options: options.workflow.clone(),
        };

        Ok(Self {
            memory,
            orchestrator: Orchestrator::new(deps),
        })
    }
}

/// Configured schema files followed by the ones found in the schema directory
async fn schema_files(options: &AppOptions) -> Vec<File> {
    let mut files: Vec<File> = options.schema_docs.iter().map(File::new).collect();

    let schema_dir = options.layout.schema_dir();
    if schema_dir.exists().await {
        match schema_dir.list_files(SCHEMA_EXTENSIONS).await {
            Ok(found) => {
                let configured = &options.schema_docs;
                files.extend(
                    found
                        .into_iter()
                        .filter(|file| !configured.iter().any(|p| p.as_path() == file.path())),
                );
            }
            Err(e) => warn!(
                "Unable to list schema directory {}: {}",
                schema_dir.path().display(),
                e
            ),
        }
    }
    files
}

/// Store each readable file as a schema document; unreadable files are skipped
pub async fn seed_schema_docs(memory: &dyn MemoryStore, files: &[File]) -> usize {
    let mut seeded = 0;
    for file in files {
        let content = match file.read_string().await {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping schema file {}: {}", file.path().display(), e);
                continue;
            }
        };
        match memory
            .store_vector_memory(&content, schema_metadata(&file.name()))
            .await
        {
            Ok(()) => seeded += 1,
            Err(e) => warn!("Failed to store schema file {}: {}", file.path().display(), e),
        }
    }
    seeded
}
