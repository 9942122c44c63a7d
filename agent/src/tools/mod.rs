//! External tool invocation

pub mod registry;
pub mod sql;

pub use registry::{Tool, ToolRegistry};
pub use sql::{SqlQueryTool, SQL_QUERY_TOOL};
