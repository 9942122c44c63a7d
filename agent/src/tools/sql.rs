//! Read-only SQL execution tool

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::tools::registry::Tool;

/// Registry name of the SQL tool
pub const SQL_QUERY_TOOL: &str = "sql_query";

static UNSAFE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|TRUNCATE|ALTER|CREATE|INSERT|UPDATE|EXEC|EXECUTE)\b").unwrap()
});

/// Tool input payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlToolInput {
    pub query: String,
    #[serde(default)]
    pub database: Option<String>,
}

/// Executes SELECT statements against the configured SQL service
pub struct SqlQueryTool {
    http: HttpClient,
    database: Option<String>,
}

impl SqlQueryTool {
    pub fn new(http: HttpClient, database: Option<String>) -> Self {
        Self { http, database }
    }
}

/// Reject anything but a single SELECT statement
pub fn check_read_only(query: &str) -> Result<String, String> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if UNSAFE_STATEMENT.is_match(trimmed) {
        return Err("Unsafe SQL operation detected".to_string());
    }
    if trimmed.contains(';') {
        return Err("Only a single statement is allowed".to_string());
    }
    if !trimmed.to_uppercase().starts_with("SELECT") {
        return Err("Only SELECT queries are allowed".to_string());
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        SQL_QUERY_TOOL
    }

    fn description(&self) -> &str {
        "Execute read-only SQL queries on available databases"
    }

    async fn invoke(&self, input: &str) -> Result<String, AgentError> {
        let parsed: SqlToolInput = serde_json::from_str(input)
            .map_err(|e| AgentError::ToolError(format!("invalid sql_query input: {}", e)))?;

        let query = match check_read_only(&parsed.query) {
            Ok(query) => query,
            Err(reason) => return Ok(json!({ "error": reason }).to_string()),
        };

        let database = parsed.database.or_else(|| self.database.clone());
        info!(
            "Executing SQL query (database: {}, {} chars)",
            database.as_deref().unwrap_or("default"),
            query.len()
        );

        let body = SqlToolInput { query, database };
        match self.http.post_text("/query", &body).await {
            Ok(text) => Ok(text),
            Err(e) => {
                error!("SQL query failed: {}", e);
                Ok(json!({ "error": e.to_string() }).to_string())
            }
        }
    }
}
