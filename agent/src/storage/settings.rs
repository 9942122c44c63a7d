//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable overriding `llm.api_key`
pub const ENV_LLM_API_KEY: &str = "CHARTFLOW_LLM_API_KEY";
/// Environment variable overriding `llm.base_url`
pub const ENV_LLM_BASE_URL: &str = "CHARTFLOW_LLM_BASE_URL";
/// Environment variable overriding `sql_tool.base_url`
pub const ENV_SQL_URL: &str = "CHARTFLOW_SQL_URL";
/// Environment variable overriding `log_level`
pub const ENV_LOG_LEVEL: &str = "CHARTFLOW_LOG_LEVEL";

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// SQL execution service configuration
    #[serde(default)]
    pub sql_tool: SqlToolSettings,

    /// Workflow configuration
    #[serde(default)]
    pub workflow: WorkflowSettings,

    /// Route chart requests through the chart pipeline
    #[serde(default = "default_true")]
    pub enable_chart_generation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            llm: LlmSettings::default(),
            sql_tool: SqlToolSettings::default(),
            workflow: WorkflowSettings::default(),
            enable_chart_generation: true,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file, falling back to defaults when the file is absent
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        if !file.exists().await {
            debug!("Settings file {} not found, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await
    }

    /// Apply environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_LLM_API_KEY).filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(SecretString::from(key));
        }
        if let Some(url) = lookup(ENV_LLM_BASE_URL).filter(|v| !v.is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(url) = lookup(ENV_SQL_URL).filter(|v| !v.is_empty()) {
            self.sql_tool.base_url = url;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            match level.parse::<LogLevel>() {
                Ok(level) => self.log_level = level,
                Err(e) => warn!("Ignoring {}: {}", ENV_LOG_LEVEL, e),
            }
        }
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), AgentError> {
        Url::parse(&self.llm.base_url).map_err(|e| {
            AgentError::ConfigError(format!("invalid llm.base_url '{}': {}", self.llm.base_url, e))
        })?;
        Url::parse(&self.sql_tool.base_url).map_err(|e| {
            AgentError::ConfigError(format!(
                "invalid sql_tool.base_url '{}': {}",
                self.sql_tool.base_url, e
            ))
        })?;
        if self.workflow.max_retries < 1 {
            return Err(AgentError::ConfigError(
                "workflow.max_retries must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AgentError::ConfigError(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    /// Primary model
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Model used when the primary model fails
    #[serde(default)]
    pub fallback_model: Option<String>,

    /// API key, never written back to disk
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum completion tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Attempts per model before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_llm_model(),
            fallback_model: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// SQL execution service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlToolSettings {
    /// Base URL of the SQL service
    #[serde(default = "default_sql_url")]
    pub base_url: String,

    /// Database name sent with each query, service default when unset
    #[serde(default)]
    pub database: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_sql_timeout")]
    pub timeout_secs: u64,
}

fn default_sql_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_sql_timeout() -> u64 {
    30
}

impl Default for SqlToolSettings {
    fn default() -> Self {
        Self {
            base_url: default_sql_url(),
            database: None,
            timeout_secs: default_sql_timeout(),
        }
    }
}

/// Workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Failed attempts allowed per query step
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Conversation turns loaded as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Schema documentation files loaded at startup
    #[serde(default)]
    pub schema_docs: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_history_limit() -> usize {
    5
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            history_limit: default_history_limit(),
            schema_docs: Vec::new(),
        }
    }
}
