//! Chartflow Library
//!
//! Core modules of the chart-generation agent: the workflow engine, its
//! steps, schema adherence checks and chart data shaping.

pub mod agent;
pub mod app;
pub mod charts;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod llm;
pub mod logs;
pub mod memory;
pub mod models;
pub mod schema;
pub mod storage;
pub mod tools;
pub mod utils;
pub mod workflow;
