//! Tool result overflow handling
//!
//! Oversized tool results are truncated in place or diverted to temporary
//! artifact files before they enter the history, depending on how much of the
//! context window is left.

pub mod classifier;
pub mod guard;
pub mod registry;
pub mod storage;

pub use guard::{ResponseOverflowGuard, TRUNCATION_MARKER};
pub use registry::ArtifactRegistry;
pub use storage::ArtifactStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::history::Part;

/// Format of a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Json,
    PlainText,
    Html,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Json => "json",
            ArtifactKind::PlainText => "txt",
            ArtifactKind::Html => "html",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ArtifactKind::Json => "pretty-printed JSON",
            ArtifactKind::PlainText => "plain text",
            ArtifactKind::Html => "formatted HTML",
        }
    }
}

/// A tool result written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverflowArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub kind: ArtifactKind,
}

impl OverflowArtifact {
    pub fn new(path: PathBuf, ttl: Duration, kind: ArtifactKind) -> Self {
        Self {
            path,
            created_at: Utc::now(),
            ttl,
            kind,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.ttl)
            .map(|ttl| now - self.created_at >= ttl)
            .unwrap_or(false)
    }
}

/// Result of guarding one tool output
#[derive(Debug, Clone, PartialEq)]
pub struct GuardResult {
    pub parts: Vec<Part>,
    pub was_truncated: bool,
    pub was_stored_as_file: bool,
    pub estimated_tokens: usize,
    /// Artifact holding the full output, when stored
    pub artifact: Option<PathBuf>,
}
