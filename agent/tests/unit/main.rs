//! Integration tests for the chart workflow

mod support;
mod test_orchestrator;
mod test_workflow;
