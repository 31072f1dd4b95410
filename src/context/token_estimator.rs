//! Local token estimation, used when the endpoint counter is unavailable

use crate::config::LocalEstimator;
use crate::error::{ContextError, Result};
use crate::history::Turn;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }

    /// Estimate tokens for a message list from its serialized form
    fn estimate_turns(&self, turns: &[Turn]) -> usize {
        turns
            .iter()
            .map(|turn| match serde_json::to_string(&turn.parts) {
                Ok(json) => self.estimate(&json),
                Err(_) => 0,
            })
            .sum()
    }
}

/// `ceil(bytes / 4)`, the usual rough ratio for English text and code
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteHeuristicEstimator;

impl ByteHeuristicEstimator {
    pub fn estimate_bytes(bytes: usize) -> usize {
        bytes.div_ceil(4)
    }
}

impl TokenEstimator for ByteHeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        Self::estimate_bytes(text.len())
    }
}

/// Tiktoken-based token estimator using cl100k_base
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| ContextError::Internal(format!("failed to load cl100k_base: {}", e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Build the configured local estimator, falling back to the byte heuristic
/// when the tokenizer tables cannot be loaded.
pub fn local_estimator(kind: LocalEstimator) -> Arc<dyn TokenEstimator> {
    match kind {
        LocalEstimator::Heuristic => Arc::new(ByteHeuristicEstimator),
        LocalEstimator::Tiktoken => match TiktokenEstimator::new() {
            Ok(estimator) => Arc::new(estimator),
            Err(e) => {
                warn!(error = %e, "Tiktoken unavailable, using byte heuristic");
                Arc::new(ByteHeuristicEstimator)
            }
        },
    }
}
