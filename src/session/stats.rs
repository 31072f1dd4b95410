//! Running token statistics for a session

use super::store::{PersistentStore, StoreError};
use crate::compaction::CompactionRecord;
use crate::endpoint::UsageMetadata;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-session token accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
    pub total_tokens: u64,
    /// Prompt size of the latest request, the best measure of history size
    pub last_prompt_tokens: usize,
    pub turns: u64,
    pub compactions: u64,
    pub tokens_saved: u64,
}

impl TokenStats {
    pub fn storage_key(session_id: &str) -> String {
        format!("session/{}/token_stats", session_id)
    }

    pub fn record_usage(&mut self, usage: &UsageMetadata) {
        self.prompt_tokens += usage.prompt_token_count as u64;
        self.candidate_tokens += usage.candidates_token_count as u64;
        self.total_tokens += usage.total_token_count as u64;
        self.last_prompt_tokens = usage.prompt_token_count;
    }

    pub fn record_turn(&mut self) {
        self.turns += 1;
    }

    pub fn record_compaction(&mut self, record: &CompactionRecord) {
        self.compactions += 1;
        self.tokens_saved += record.tokens_saved() as u64;
        self.last_prompt_tokens = record.new_token_count;
    }

    /// Load saved statistics; missing or unreadable entries start fresh.
    pub async fn load(store: &dyn PersistentStore, session_id: &str) -> Self {
        let key = Self::storage_key(session_id);
        let loaded = match store.get(&key).await {
            Ok(Some(value)) => serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string())),
            Ok(None) => return Self::default(),
            Err(e) => Err(e),
        };
        loaded.unwrap_or_else(|e| {
            warn!(session_id, error = %e, "Could not load token statistics, starting fresh");
            Self::default()
        })
    }

    /// Save statistics. Failures are logged, never returned.
    pub async fn persist(&self, store: &dyn PersistentStore, session_id: &str) {
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => {
                warn!(session_id, error = %e, "Could not encode token statistics");
                return;
            }
        };
        if let Err(e) = store.put(&Self::storage_key(session_id), value).await {
            warn!(session_id, error = %e, "Could not persist token statistics");
        }
    }
}
