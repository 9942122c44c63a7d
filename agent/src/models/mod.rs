//! Workflow data models

pub mod chart;
pub mod state;

pub use chart::{
    ChartData, ChartType, ClarificationRequest, DataRequirement, QueryInstruction, QueryResult,
    SqlQuery, ValidationResult,
};
pub use state::{AgentState, Intent, Progress, StateName, DEFAULT_MAX_RETRIES};
