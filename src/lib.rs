//! Session-state core for tool-using LLM agents
//!
//! Keeps a multi-turn, tool-calling conversation consistent under a finite
//! token budget: a curated turn ledger, request sanitization that pairs every
//! tool call with its result, budget-aware compaction, overflow handling for
//! oversized tool results, and per-path serialization of file operations.

pub mod compaction;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod file_queue;
pub mod history;
pub mod metrics;
pub mod overflow;
pub mod sanitizer;
pub mod session;
pub mod telemetry;

pub use compaction::{CompactionOutcome, CompactionRecord, HistoryCompactor, Summarizer};
pub use config::Config;
pub use endpoint::{EndpointError, GenerateRequest, ModelEndpoint, ModelResponse};
pub use error::{ContextError, Result};
pub use file_queue::{FileQueueError, FileResourceQueue};
pub use history::{FunctionCall, FunctionResponse, HistoryStore, Part, Role, Turn};
pub use overflow::{GuardResult, ResponseOverflowGuard};
pub use sanitizer::{sanitize, sanitize_with_report, SanitizeReport};
pub use session::{ChatSession, InMemoryStore, PersistentStore, TokenStats, ToolResult};
