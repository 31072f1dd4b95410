//! Response overflow guard

use super::classifier::{classify, floor_char_boundary, plain_text};
use super::registry::ArtifactRegistry;
use super::storage::ArtifactStorage;
use super::{ArtifactKind, GuardResult, OverflowArtifact};
use crate::config::OverflowConfig;
use crate::context::{local_estimator, BudgetTier, TokenEstimator};
use crate::endpoint::{ModelEndpoint, DEFAULT_TOKEN_LIMIT};
use crate::history::{Part, Turn};
use crate::metrics::METRICS;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Appended to truncated output
pub const TRUNCATION_MARKER: &str = "\n\n[Output truncated: the full result was too large for the remaining context window. Do not request it again in full; use a file search tool with a narrower pattern to find the part you need.]";

/// Truncation never keeps less than this many bytes
pub const MIN_KEEP_BYTES: usize = 2_000;

/// Upper bound for the guidance message returned in place of a stored result
pub const MAX_GUIDANCE_BYTES: usize = 2_048;

/// Shrinks or diverts oversized tool results before they enter the history
pub struct ResponseOverflowGuard {
    config: OverflowConfig,
    endpoint: Option<Arc<dyn ModelEndpoint>>,
    estimator: Arc<dyn TokenEstimator>,
    storage: ArtifactStorage,
    registry: Arc<ArtifactRegistry>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseOverflowGuard {
    /// Create a guard and start its expiry sweep on the current runtime.
    pub fn new(config: OverflowConfig, endpoint: Option<Arc<dyn ModelEndpoint>>) -> Self {
        let storage = ArtifactStorage::resolve(config.temp_dir.as_deref());
        Self::with_storage(config, endpoint, storage)
    }

    pub fn with_storage(
        config: OverflowConfig,
        endpoint: Option<Arc<dyn ModelEndpoint>>,
        storage: ArtifactStorage,
    ) -> Self {
        let registry = Arc::new(ArtifactRegistry::new());
        let shutdown = CancellationToken::new();
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(ArtifactRegistry::spawn_sweeper(
                registry.clone(),
                config.sweep_interval(),
                shutdown.clone(),
            )),
            Err(_) => {
                warn!("No async runtime; overflow artifacts expire only on cleanup");
                None
            }
        };

        Self {
            estimator: local_estimator(config.local_estimator),
            config,
            endpoint,
            storage,
            registry,
            shutdown,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        self.storage.dir()
    }

    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    /// Live artifacts, oldest first
    pub fn artifacts(&self) -> Vec<OverflowArtifact> {
        self.registry.list()
    }

    async fn estimate_tokens(&self, model: &str, parts: &[Part], serialized: &str) -> usize {
        if let Some(endpoint) = &self.endpoint {
            match endpoint.count_tokens(model, &[Turn::user(parts.to_vec())]).await {
                Ok(count) => return count,
                Err(e) => debug!(error = %e, "Endpoint token count failed, estimating locally"),
            }
        }
        self.estimator.estimate(serialized)
    }

    fn token_limit(&self, model: &str) -> usize {
        self.endpoint
            .as_ref()
            .map_or(DEFAULT_TOKEN_LIMIT, |endpoint| endpoint.token_limit(model))
    }

    /// Guard one tool output.
    ///
    /// `context_remaining_percent` is the free share of `model`'s window, 0-100.
    /// Never fails: a storage error degrades to truncation.
    pub async fn guard(
        &self,
        parts: Vec<Part>,
        context_remaining_percent: f64,
        tool_name: &str,
        model: &str,
    ) -> GuardResult {
        let serialized = serde_json::to_string(&parts).unwrap_or_default();
        let original_size = serialized.len();
        let estimated_tokens = self.estimate_tokens(model, &parts, &serialized).await;

        let remaining_percent = context_remaining_percent.clamp(0.0, 100.0);
        let remaining_tokens = (remaining_percent / 100.0 * self.token_limit(model) as f64) as usize;
        let max_size = self.config.max_response_size;

        if original_size <= max_size && estimated_tokens.saturating_mul(2) <= remaining_tokens {
            METRICS.record_overflow("passthrough", original_size);
            return GuardResult {
                parts,
                was_truncated: false,
                was_stored_as_file: false,
                estimated_tokens,
                artifact: None,
            };
        }

        let tier = BudgetTier::from_remaining_percent(
            remaining_percent,
            self.config.critical_remaining_percent,
            self.config.low_remaining_percent,
        );
        let store = match tier {
            BudgetTier::Critical => true,
            BudgetTier::Low => original_size > max_size.saturating_mul(2),
            BudgetTier::Normal => original_size > max_size,
        };
        debug!(
            tool = tool_name,
            original_size,
            estimated_tokens,
            remaining_tokens,
            tier = tier.as_str(),
            store,
            "Tool output exceeds inline budget"
        );

        let truncate_to = remaining_tokens.saturating_mul(2).max(MIN_KEEP_BYTES).min(max_size);
        if store {
            match self.store(&parts, tool_name, original_size, estimated_tokens).await {
                Ok(result) => return result,
                Err(e) => {
                    warn!(
                        tool = tool_name,
                        error = %e,
                        "Failed to store oversized tool output, truncating instead"
                    );
                    METRICS.record_overflow("storage_fallback", original_size);
                    return self.truncate(&parts, truncate_to, estimated_tokens);
                }
            }
        }

        METRICS.record_overflow("truncated", original_size);
        self.truncate(&parts, truncate_to, estimated_tokens)
    }

    async fn store(
        &self,
        parts: &[Part],
        tool_name: &str,
        original_size: usize,
        estimated_tokens: usize,
    ) -> std::io::Result<GuardResult> {
        let classified = classify(parts);
        let path = self
            .storage
            .write(tool_name, classified.kind, &classified.content)
            .await?;
        self.registry.register(OverflowArtifact::new(
            path.clone(),
            self.config.artifact_ttl(),
            classified.kind,
        ));

        info!(
            tool = tool_name,
            path = %path.display(),
            bytes = original_size,
            kind = ?classified.kind,
            "Stored oversized tool output"
        );
        METRICS.record_overflow("stored", original_size);

        let guidance = guidance_message(
            tool_name,
            &path,
            classified.content.len(),
            estimated_tokens,
            classified.kind,
            self.config.artifact_ttl_secs,
        );
        Ok(GuardResult {
            parts: vec![Part::text(guidance)],
            was_truncated: false,
            was_stored_as_file: true,
            estimated_tokens,
            artifact: Some(path),
        })
    }

    fn truncate(&self, parts: &[Part], max_bytes: usize, estimated_tokens: usize) -> GuardResult {
        let text = plain_text(parts);
        GuardResult {
            parts: vec![Part::text(truncate_text(&text, max_bytes))],
            was_truncated: true,
            was_stored_as_file: false,
            estimated_tokens,
            artifact: None,
        }
    }

    /// Delete every live artifact now.
    pub async fn cleanup(&self) -> usize {
        self.registry.cleanup().await
    }

    /// Stop the expiry sweep and wait for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().ok().and_then(|mut sweeper| sweeper.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Overflow sweep task ended abnormally");
            }
        }
    }
}

impl Drop for ResponseOverflowGuard {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Keep the head of `text` within `max_bytes` including the marker, cutting
/// at a newline near the end when there is one.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let keep = floor_char_boundary(text, max_bytes.saturating_sub(TRUNCATION_MARKER.len()));
    let cut = text[..keep]
        .rfind('\n')
        .filter(|&pos| pos > keep * 4 / 5)
        .unwrap_or(keep);
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

fn search_example(path: &Path, kind: ArtifactKind) -> String {
    let path = path.display();
    match kind {
        ArtifactKind::Html => format!(
            "search_file_content(path=\"{}\", pattern=\"<[a-z]+[^>]*(id|class)=\\\"[^\\\"]*login[^\\\"]*\\\"\")",
            path
        ),
        ArtifactKind::Json => format!(
            "search_file_content(path=\"{}\", pattern=\"\\\"(error|status|message)\\\"\\s*:\")",
            path
        ),
        ArtifactKind::PlainText => format!(
            "search_file_content(path=\"{}\", pattern=\"error|warning|failed\")",
            path
        ),
    }
}

/// Text returned in place of a stored result: where it is, what it holds and
/// how to search it.
pub fn guidance_message(
    tool_name: &str,
    path: &Path,
    bytes: usize,
    estimated_tokens: usize,
    kind: ArtifactKind,
    ttl_secs: u64,
) -> String {
    let message = format!(
        "The output of `{}` was too large for the context window ({} bytes, about {} tokens) and was saved to:\n{}\n\nFormat: {}. The file is deleted after {} minutes.\nDo not read the whole file. Search it for what you need, for example:\n{}",
        tool_name,
        bytes,
        estimated_tokens,
        path.display(),
        kind.description(),
        ttl_secs / 60,
        search_example(path, kind)
    );
    if message.len() <= MAX_GUIDANCE_BYTES {
        message
    } else {
        let keep = floor_char_boundary(&message, MAX_GUIDANCE_BYTES);
        message[..keep].to_string()
    }
}
