//! Wire models for the chartflow agent.

pub mod models;
