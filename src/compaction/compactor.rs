//! History compactor

use super::boundary::find_boundary;
use super::prompts::SUMMARY_BRIDGE;
use super::summarizer::{EndpointSummarizer, Summarizer};
use super::{CompactionOutcome, CompactionRecord};
use crate::config::CompactionConfig;
use crate::context::{ByteHeuristicEstimator, ContextBudget, TokenEstimator};
use crate::endpoint::{ModelEndpoint, RetryPolicy};
use crate::history::{merge_adjacent_text, HistoryStore, Part, Turn};
use crate::metrics::METRICS;
use crate::sanitizer::sweep_orphans;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summarizes the oldest part of a history when it nears the context window
pub struct HistoryCompactor {
    endpoint: Arc<dyn ModelEndpoint>,
    summarizer: Arc<dyn Summarizer>,
    estimator: Arc<dyn TokenEstimator>,
    config: CompactionConfig,
}

impl HistoryCompactor {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, config: CompactionConfig, retry: RetryPolicy) -> Self {
        let summarizer = Arc::new(EndpointSummarizer::new(
            endpoint.clone(),
            retry,
            config.summarization_temperature,
        ));
        Self {
            endpoint,
            summarizer,
            estimator: Arc::new(ByteHeuristicEstimator),
            config,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Estimator used when the endpoint cannot count tokens
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Exact count from the endpoint, `None` if the counter failed.
    pub async fn count_tokens(&self, model: &str, turns: &[Turn]) -> Option<usize> {
        match self.endpoint.count_tokens(model, turns).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(model, error = %e, "Token count unavailable");
                None
            }
        }
    }

    async fn count_or_estimate(&self, model: &str, turns: &[Turn]) -> usize {
        match self.count_tokens(model, turns).await {
            Some(count) => count,
            None => self.estimator.estimate_turns(turns),
        }
    }

    /// Whether `history` has reached the compaction threshold for `model`.
    ///
    /// A failed token count never triggers compaction unless `force` is set.
    pub async fn should_compact(&self, history: &[Turn], model: &str, force: bool) -> (bool, Option<usize>) {
        let count = self.count_tokens(model, history).await;
        if force {
            return (true, count);
        }
        match count {
            Some(tokens) => {
                let budget = ContextBudget::new(self.endpoint.token_limit(model), tokens);
                (budget.exceeds(self.config.threshold_fraction), Some(tokens))
            }
            None => (false, None),
        }
    }

    /// Compact the store's history if it is over the threshold or `force` is set.
    pub async fn maybe_compact(&self, store: &mut HistoryStore, model: &str, force: bool) -> CompactionOutcome {
        let history = store.read(true);
        let (should, tokens) = self.should_compact(&history, model, force).await;
        if !should {
            let reason = match tokens {
                Some(tokens) => format!(
                    "{} tokens is below {:.0}% of the {}-token window",
                    tokens,
                    self.config.threshold_fraction * 100.0,
                    self.endpoint.token_limit(model)
                ),
                None => "token count unavailable".to_string(),
            };
            debug!(model, reason = %reason, "Compaction not needed");
            return CompactionOutcome::NoAction { reason };
        }
        self.compact(store, model, self.config.preserve_fraction).await
    }

    /// Compact the store's curated history, keeping roughly
    /// `preserve_fraction` of it verbatim. The store is replaced in one step
    /// on success and left untouched otherwise.
    ///
    /// A successful compaction rebuilds the raw ledger from the curated view,
    /// so invalid model output and alternation placeholders recorded before
    /// the compaction no longer appear in `read(false)` afterwards.
    pub async fn compact(&self, store: &mut HistoryStore, model: &str, preserve_fraction: f64) -> CompactionOutcome {
        let history = store.read(true);
        let (outcome, compacted) = self.compact_turns(&history, model, preserve_fraction).await;
        if let Some(turns) = compacted {
            store.replace(turns);
        }

        METRICS.record_compaction(
            outcome.label(),
            outcome.record().map(|r| (r.original_token_count, r.new_token_count)),
        );
        outcome
    }

    /// Compact a history without touching any store.
    ///
    /// Returns the outcome and, when compacted, the new history.
    pub async fn compact_turns(
        &self,
        history: &[Turn],
        model: &str,
        preserve_fraction: f64,
    ) -> (CompactionOutcome, Option<Vec<Turn>>) {
        let preserve_fraction = preserve_fraction.clamp(0.0, 1.0);
        let env_len = self.config.environment_turns.min(history.len());
        let (environment, conversation) = history.split_at(env_len);

        if conversation.len() < self.config.min_conversation_turns.max(2) {
            debug!(turns = conversation.len(), "Too few conversation turns to compact");
            return (CompactionOutcome::SkippedInsufficientHistory, None);
        }

        let boundary = match find_boundary(conversation, preserve_fraction) {
            Some(boundary) => boundary,
            None => {
                warn!(turns = conversation.len(), preserve_fraction, "No safe compaction boundary");
                return (CompactionOutcome::SkippedBoundaryNotFound, None);
            }
        };
        let (prefix, suffix) = conversation.split_at(boundary);

        let purified = purify(prefix);
        if purified.is_empty() {
            debug!(boundary, "Compacted prefix has no text to summarize");
            return (CompactionOutcome::SkippedInsufficientHistory, None);
        }

        let original_tokens = self.count_or_estimate(model, history).await;

        let summary = match self.summarizer.summarize(model, &purified).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!(model, "Summarization returned an empty summary");
                return (failed("empty summary"), None);
            }
            Err(e) => {
                warn!(model, error = %e, "Summarization failed");
                return (failed(&format!("summarization failed: {}", e)), None);
            }
        };

        let mut rebuilt: Vec<Turn> = environment.to_vec();
        if !rebuilt.last().map_or(false, Turn::is_user) {
            rebuilt.push(Turn::user_text(SUMMARY_BRIDGE));
        }
        rebuilt.push(Turn::model_text(summary.clone()));
        rebuilt.extend(strip_head_responses(suffix));
        let rebuilt = sweep_orphans(rebuilt);

        let new_tokens = self.count_or_estimate(model, &rebuilt).await;
        if new_tokens >= original_tokens {
            warn!(
                original_tokens,
                new_tokens, "Compaction would not reduce the token count"
            );
            return (failed("inflated token count"), None);
        }

        let record = CompactionRecord {
            original_token_count: original_tokens,
            new_token_count: new_tokens,
            summary_text: summary,
            boundary_index: env_len + boundary,
        };
        info!(
            original_tokens,
            new_tokens,
            boundary = record.boundary_index,
            turns_before = history.len(),
            turns_after = rebuilt.len(),
            "Compacted history"
        );
        (CompactionOutcome::Compacted(record), Some(rebuilt))
    }

    /// Compact so the history fits `target_model`'s window before switching
    /// to it. Does nothing when the history already fits.
    pub async fn compact_to_fit(
        &self,
        store: &mut HistoryStore,
        current_model: &str,
        target_model: &str,
    ) -> CompactionOutcome {
        let history = store.read(true);
        let current_tokens = self.count_or_estimate(current_model, &history).await;
        let target_limit = self.endpoint.token_limit(target_model);
        let safe_limit = (target_limit as f64 * self.config.fit_safety_margin) as usize;

        if current_tokens <= safe_limit {
            let reason = format!(
                "{} tokens already fit {} ({} of {} tokens usable)",
                current_tokens, target_model, safe_limit, target_limit
            );
            debug!(reason = %reason, "Skipping compaction before model switch");
            METRICS.record_compaction("no_action", None);
            return CompactionOutcome::NoAction { reason };
        }

        let available = safe_limit.saturating_sub(self.config.overhead_estimate_tokens) as f64;
        let preserve_fraction = (available / current_tokens.max(1) as f64)
            .max(self.config.min_preserve_fraction)
            .min(self.config.max_preserve_fraction);
        info!(
            current_tokens,
            target_model,
            target_limit,
            preserve_fraction,
            "Compacting to fit a smaller context window"
        );
        self.compact(store, current_model, preserve_fraction).await
    }
}

fn failed(reason: &str) -> CompactionOutcome {
    CompactionOutcome::Failed {
        reason: reason.to_string(),
    }
}

/// Reduce turns to their text so the summarization request carries no tool traffic.
fn purify(turns: &[Turn]) -> Vec<Turn> {
    let mut purified: Vec<Turn> = Vec::new();
    for turn in turns {
        let parts: Vec<Part> = turn
            .parts
            .iter()
            .filter(|p| matches!(p, Part::Text { text } if !text.is_empty()))
            .cloned()
            .collect();
        if parts.is_empty() {
            continue;
        }
        match purified.last_mut() {
            Some(last) if last.role == turn.role => {
                let mut joined = std::mem::take(&mut last.parts);
                joined.push(Part::text("\n\n"));
                joined.extend(parts);
                last.parts = merge_adjacent_text(joined);
            }
            _ => purified.push(Turn::new(turn.role, merge_adjacent_text(parts))),
        }
    }
    purified
}

/// Drop tool results opening the kept suffix; their calls were summarized away.
fn strip_head_responses(suffix: &[Turn]) -> Vec<Turn> {
    let mut kept = suffix.to_vec();
    if let Some(head) = kept.first_mut() {
        if head.is_user() && head.has_function_responses() {
            head.parts.retain(|p| !matches!(p, Part::FunctionResponse(_)));
            if head.is_empty() {
                kept.remove(0);
            }
        }
    }
    kept
}
