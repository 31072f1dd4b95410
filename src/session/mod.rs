//! Chat sessions and their persisted state

pub mod chat;
pub mod stats;
pub mod store;

pub use chat::{ChatSession, ToolResult};
pub use stats::TokenStats;
pub use store::{InMemoryStore, PersistentStore, StoreError};
