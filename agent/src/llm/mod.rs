//! Language model collaborator: message types, client trait, HTTP gateway and
//! response parsing.

pub mod client;
pub mod gateway;
pub mod message;
pub mod parser;

pub use client::{CompletionOptions, LlmClient, TextStream};
pub use message::{ChatMessage, Role};
