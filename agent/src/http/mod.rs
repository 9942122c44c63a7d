//! HTTP plumbing shared by the LLM gateway and tools

pub mod client;
