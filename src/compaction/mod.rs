//! Budget-aware history compaction
//!
//! When the history nears the model's context window, the oldest part of the
//! conversation is replaced by a single summary turn. Leading environment
//! turns are never compacted, the split never separates a tool call from its
//! result, and a failed summarization leaves the history untouched.

pub mod boundary;
pub mod compactor;
pub mod prompts;
pub mod summarizer;

pub use boundary::{find_boundary, is_safe_boundary, tentative_boundary};
pub use compactor::HistoryCompactor;
pub use summarizer::{EndpointSummarizer, Summarizer};

use serde::Serialize;

/// Summary of one successful compaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionRecord {
    pub original_token_count: usize,
    pub new_token_count: usize,
    pub summary_text: String,
    /// Index in the pre-compaction history of the first turn kept verbatim
    pub boundary_index: usize,
}

impl CompactionRecord {
    pub fn tokens_saved(&self) -> usize {
        self.original_token_count.saturating_sub(self.new_token_count)
    }
}

/// Decision taken by one compaction attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompactionOutcome {
    NoAction { reason: String },
    SkippedBoundaryNotFound,
    SkippedInsufficientHistory,
    Compacted(CompactionRecord),
    Failed { reason: String },
}

impl CompactionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CompactionOutcome::NoAction { .. } => "no_action",
            CompactionOutcome::SkippedBoundaryNotFound => "skipped_boundary_not_found",
            CompactionOutcome::SkippedInsufficientHistory => "skipped_insufficient_history",
            CompactionOutcome::Compacted(_) => "compacted",
            CompactionOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted(_))
    }

    pub fn record(&self) -> Option<&CompactionRecord> {
        match self {
            CompactionOutcome::Compacted(record) => Some(record),
            _ => None,
        }
    }
}
