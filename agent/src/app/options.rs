//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::errors::AgentError;
use crate::llm::gateway::GatewayOptions;
use crate::logs::{LogLevel, LogOptions};
use crate::models::DEFAULT_MAX_RETRIES;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SQL_URL: &str = "http://localhost:8090";

fn parse_url(field: &str, value: &str) -> Result<Url, AgentError> {
    Url::parse(value)
        .map_err(|e| AgentError::ConfigError(format!("invalid {} '{}': {}", field, value, e)))
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Logging configuration
    pub log: LogOptions,

    /// Language model configuration
    pub llm: LlmOptions,

    /// SQL tool configuration
    pub sql_tool: SqlToolOptions,

    /// Workflow configuration
    pub workflow: WorkflowOptions,

    /// Schema documentation files seeded into memory at startup
    pub schema_docs: Vec<PathBuf>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            log: LogOptions::default(),
            llm: LlmOptions::default(),
            sql_tool: SqlToolOptions::default(),
            workflow: WorkflowOptions::default(),
            schema_docs: Vec::new(),
        }
    }
}

impl AppOptions {
    /// Runtime options from validated settings
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, AgentError> {
        settings.validate()?;

        let log = LogOptions {
            log_level: settings.log_level.clone(),
            log_dir: settings.log_dir.as_ref().map(PathBuf::from),
            json_format: settings.log_json,
            ..Default::default()
        };

        let llm = LlmOptions {
            base_url: parse_url("llm.base_url", &settings.llm.base_url)?,
            api_key: settings.llm.api_key.clone(),
            timeout: Duration::from_secs(settings.llm.timeout_secs),
            gateway: GatewayOptions {
                model: settings.llm.model.clone(),
                fallback_model: settings.llm.fallback_model.clone(),
                temperature: settings.llm.temperature,
                max_tokens: settings.llm.max_tokens,
                max_attempts: settings.llm.max_attempts,
                ..Default::default()
            },
        };

        let sql_tool = SqlToolOptions {
            base_url: parse_url("sql_tool.base_url", &settings.sql_tool.base_url)?,
            database: settings.sql_tool.database.clone(),
            timeout: Duration::from_secs(settings.sql_tool.timeout_secs),
        };

        let workflow = WorkflowOptions {
            max_retries: settings.workflow.max_retries,
            history_limit: settings.workflow.history_limit,
            enable_chart_generation: settings.enable_chart_generation,
        };

        // Relative schema paths resolve against the storage directory
        let schema_docs = settings
            .workflow
            .schema_docs
            .iter()
            .map(|path| layout.base_dir.join(path))
            .collect();

        Ok(Self {
            layout,
            log,
            llm,
            sql_tool,
            workflow,
            schema_docs,
        })
    }
}

/// Language model options
#[derive(Debug, Clone)]
pub struct LlmOptions {
    /// Base URL of an OpenAI-compatible API
    pub base_url: Url,

    pub api_key: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,

    /// Model selection and retry behavior
    pub gateway: GatewayOptions,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_LLM_URL).expect("default LLM URL is valid"),
            api_key: None,
            timeout: Duration::from_secs(60),
            gateway: GatewayOptions::default(),
        }
    }
}

/// SQL tool options
#[derive(Debug, Clone)]
pub struct SqlToolOptions {
    /// Base URL of the SQL service
    pub base_url: Url,

    /// Database sent with each query
    pub database: Option<String>,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for SqlToolOptions {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_SQL_URL).expect("default SQL URL is valid"),
            database: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Workflow options shared by every run
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Generation attempts allowed per plan step
    pub max_retries: u32,

    /// Conversation turns loaded as context
    pub history_limit: usize,

    /// Route chart requests through the chart pipeline
    pub enable_chart_generation: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            history_limit: 5,
            enable_chart_generation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.log_level = LogLevel::Debug;
        settings.workflow.max_retries = 4;
        settings.workflow.schema_docs = vec!["schema/orders.md".to_string()];
        settings.enable_chart_generation = false;

        let layout = StorageLayout::new("/tmp/chartflow");
        let options = AppOptions::from_settings(&settings, layout).unwrap();
        assert_eq!(options.log.log_level, LogLevel::Debug);
        assert_eq!(options.workflow.max_retries, 4);
        assert!(!options.workflow.enable_chart_generation);
        assert_eq!(options.llm.timeout, Duration::from_secs(60));
        assert_eq!(
            options.schema_docs,
            vec![PathBuf::from("/tmp/chartflow/schema/orders.md")]
        );
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.sql_tool.base_url = "not a url".to_string();
        let err = AppOptions::from_settings(&settings, StorageLayout::new("/tmp")).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }
}
