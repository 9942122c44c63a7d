//! Application wiring: options, shared state and the run entry point

pub mod options;
pub mod run;
pub mod state;
