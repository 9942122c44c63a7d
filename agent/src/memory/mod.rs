//! Conversation history and document memory

pub mod in_memory;
pub mod store;

pub use in_memory::InMemoryStore;
pub use store::{ConversationTurn, Document, MemoryStore, VectorQuery};
