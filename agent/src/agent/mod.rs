//! Request entry point

pub mod orchestrator;

pub use orchestrator::{build_response, Orchestrator};
