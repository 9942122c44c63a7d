//! Schema retrieval
//!
//! Schema text comes from long-term memory. Four lookups are tried in order
//! and the first that returns documents wins; finding nothing is not an
//! error, generation then runs without schema context.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::memory::{Document, MemoryStore, VectorQuery};
use crate::models::{AgentState, Progress, StateName};
use crate::utils::preview;
use crate::workflow::nodes::NodeContext;
use crate::workflow::update::StateUpdate;

const SCHEMA_DOC_TYPE: &str = "technical_documentation";

fn schema_filter() -> VectorQuery {
    VectorQuery::new(5).with_filter("type", SCHEMA_DOC_TYPE)
}

fn mentions_schema(doc: &Document) -> bool {
    let lower = doc.page_content.to_lowercase();
    ["table", "schema", "column"].iter().any(|k| lower.contains(k))
}

/// Metadata filters tried by the last lookup, the empty one last
fn metadata_variations() -> Vec<Map<String, Value>> {
    [
        Some(("type", SCHEMA_DOC_TYPE)),
        Some(("category", "system_documentation")),
        Some(("tags", "schema")),
        None,
    ]
    .into_iter()
    .map(|entry| {
        let mut filter = Map::new();
        if let Some((key, value)) = entry {
            filter.insert(key.to_string(), Value::from(value));
        }
        filter
    })
    .collect()
}

/// Look up schema documents for the plan's tables
pub async fn retrieve_schema(
    memory: &dyn MemoryStore,
    tables: &[String],
    user_request: &str,
) -> Result<Vec<Document>, AgentError> {
    if !tables.is_empty() {
        let query = format!("Database schema tables: {}", tables.join(", "));
        let docs = memory.query_vector_memory(&query, schema_filter()).await?;
        debug!("Table lookup '{}' found {} documents", query, docs.len());
        if !docs.is_empty() {
            return Ok(docs);
        }
    }

    let query = format!(
        "Database schema documentation tables columns relationships {}",
        user_request
    );
    let docs = memory.query_vector_memory(&query, schema_filter()).await?;
    debug!("Broad lookup found {} documents", docs.len());
    if !docs.is_empty() {
        return Ok(docs);
    }

    let docs: Vec<Document> = memory
        .query_vector_memory("database schema tables columns", VectorQuery::new(10))
        .await?
        .into_iter()
        .filter(mentions_schema)
        .collect();
    debug!("Unfiltered lookup kept {} schema documents", docs.len());
    if !docs.is_empty() {
        return Ok(docs);
    }

    for filter in metadata_variations() {
        let query = VectorQuery {
            filter,
            ..VectorQuery::new(5)
        };
        let keys: Vec<String> = query.filter.keys().cloned().collect();
        let docs = memory
            .query_vector_memory("database schema documentation", query)
            .await?;
        if !docs.is_empty() {
            debug!("Metadata lookup {:?} found {} documents", keys, docs.len());
            return Ok(docs);
        }
    }
    Ok(Vec::new())
}

/// Load schema text for the planned tables
pub async fn run(state: &AgentState, ctx: &NodeContext<'_>) -> StateUpdate {
    let tables: Vec<String> = state
        .query_plan
        .iter()
        .flat_map(|instruction| instruction.tables.iter().cloned())
        .collect();
    info!("Retrieving schema for tables {:?}", tables);

    let schema = match retrieve_schema(ctx.deps.memory.as_ref(), &tables, &state.user_request).await {
        Ok(docs) if !docs.is_empty() => {
            let text = docs
                .iter()
                .map(|doc| doc.page_content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            info!("Retrieved {} schema documents ({} chars)", docs.len(), text.len());
            debug!("Schema context: {}", preview(&text, 2000));
            text
        }
        Ok(_) => {
            warn!("No schema context found in memory");
            String::new()
        }
        Err(e) => {
            warn!("Schema retrieval failed, continuing without schema: {}", e);
            String::new()
        }
    };

    StateUpdate {
        schema_context: Some(schema),
        progress: Some(Progress::new(
            StateName::UnderstandingSchema,
            "Retrieving relevant database schema information...",
        )),
        ..Default::default()
    }
}
