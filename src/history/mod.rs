//! Conversation history: turn data model, call correlation and the ledger

pub mod correlation;
pub mod models;
pub mod store;

pub use correlation::{call_matches, CorrelationKey, CorrelationTable};
pub use models::{
    merge_adjacent_text, FunctionCall, FunctionResponse, Part, Role, Turn, CANCELLATION_SENTINEL,
};
pub use store::{curate, HistoryStore};
