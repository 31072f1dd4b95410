//! Chat session: the per-turn control flow around one history

use super::stats::TokenStats;
use super::store::PersistentStore;
use crate::compaction::{CompactionOutcome, HistoryCompactor};
use crate::config::Config;
use crate::context::{local_estimator, ContextBudget, TokenEstimator};
use crate::endpoint::{
    EndpointError, GenerateRequest, GenerationConfig, ModelEndpoint, ModelResponse, RetryPolicy,
    ToolDeclaration,
};
use crate::error::{ContextError, Result};
use crate::file_queue::FileResourceQueue;
use crate::history::{merge_adjacent_text, FunctionResponse, HistoryStore, Part, Turn};
use crate::overflow::classifier::plain_text;
use crate::overflow::{GuardResult, ResponseOverflowGuard};
use crate::sanitizer::sanitize;
use futures::future::FutureExt;
use futures::StreamExt;
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Output of one executed tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: Option<String>,
    pub name: String,
    pub output: Vec<Part>,
}

impl ToolResult {
    pub fn new(call_id: Option<&str>, name: impl Into<String>, output: Vec<Part>) -> Self {
        Self {
            call_id: call_id.map(str::to_string),
            name: name.into(),
            output,
        }
    }
}

/// One conversation with a model.
///
/// Sends are serialized by a session-wide lock, so at most one request is in
/// flight and history writes never interleave.
pub struct ChatSession {
    session_id: String,
    model: RwLock<String>,
    endpoint: Arc<dyn ModelEndpoint>,
    history: Mutex<HistoryStore>,
    send_lock: Mutex<()>,
    compactor: HistoryCompactor,
    guard: ResponseOverflowGuard,
    estimator: Arc<dyn TokenEstimator>,
    file_queue: Arc<FileResourceQueue>,
    store: Option<Arc<dyn PersistentStore>>,
    stats: Mutex<TokenStats>,
    generation_config: GenerationConfig,
    persist_token_stats: bool,
}

impl ChatSession {
    /// Create a session on the current async runtime.
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, config: &Config) -> Self {
        let estimator = local_estimator(config.overflow.local_estimator);
        let compactor = HistoryCompactor::new(
            endpoint.clone(),
            config.compaction.clone(),
            RetryPolicy::from_config(&config.retry),
        )
        .with_estimator(estimator.clone());
        let guard = ResponseOverflowGuard::new(config.overflow.clone(), Some(endpoint.clone()));

        Self {
            session_id: Uuid::new_v4().to_string(),
            model: RwLock::new(config.session.model.clone()),
            endpoint,
            history: Mutex::new(HistoryStore::new()),
            send_lock: Mutex::new(()),
            compactor,
            guard,
            estimator,
            file_queue: Arc::new(FileResourceQueue::new()),
            store: None,
            stats: Mutex::new(TokenStats::default()),
            generation_config: GenerationConfig::default(),
            persist_token_stats: config.session.persist_token_stats,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Seed the history, typically with environment turns.
    pub fn with_history(mut self, turns: Vec<Turn>) -> Self {
        self.history = Mutex::new(HistoryStore::with_turns(turns));
        self
    }

    pub fn with_generation_config(mut self, generation_config: GenerationConfig) -> Self {
        self.generation_config = generation_config;
        self
    }

    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn with_guard(mut self, guard: ResponseOverflowGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Share a file queue between sessions working on the same files.
    pub fn with_file_queue(mut self, file_queue: Arc<FileResourceQueue>) -> Self {
        self.file_queue = file_queue;
        self
    }

    /// Attach a persistent store and restore saved token statistics from it.
    pub async fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        let stats = TokenStats::load(store.as_ref(), &self.session_id).await;
        self.stats = Mutex::new(stats);
        self.store = Some(store);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn model(&self) -> String {
        self.model.read().await.clone()
    }

    /// Switch models without compacting; see [`Self::compact_to_fit`].
    pub async fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!(session_id = %self.session_id, model = %model, "Switching model");
        *self.model.write().await = model;
    }

    /// Copy of the history, raw or curated
    pub async fn history(&self, curated: bool) -> Vec<Turn> {
        self.history.lock().await.read(curated)
    }

    pub async fn token_stats(&self) -> TokenStats {
        self.stats.lock().await.clone()
    }

    pub fn file_queue(&self) -> &Arc<FileResourceQueue> {
        &self.file_queue
    }

    pub fn overflow_guard(&self) -> &ResponseOverflowGuard {
        &self.guard
    }

    /// Free share of the current model's window, 0-100.
    pub async fn context_remaining_percent(&self) -> f64 {
        let model = self.model().await;
        let history = self.history(true).await;
        let used = match self.compactor.count_tokens(&model, &history).await {
            Some(count) => count,
            None => self.estimator.estimate_turns(&history),
        };
        ContextBudget::new(self.endpoint.token_limit(&model), used).remaining_percent()
    }

    /// Send a user turn and stream the model's reply into the history.
    ///
    /// Empty `parts` resends the history as is, which requires it to end in a
    /// user turn (usually tool results). Each streamed chunk is recorded as it
    /// arrives, so a cancelled or failed stream still leaves its partial
    /// output in the ledger.
    pub async fn send_message(
        &self,
        parts: Vec<Part>,
        tools: Vec<ToolDeclaration>,
        cancel: Option<CancellationToken>,
    ) -> Result<ModelResponse> {
        let _send = self.send_lock.lock().await;
        let cancel = cancel.unwrap_or_default();
        let model = self.model().await;

        if parts.is_empty() {
            let history = self.history.lock().await;
            if !history.last_turn().map_or(false, Turn::is_user) {
                return Err(ContextError::ProtocolViolation(
                    "empty message requires the history to end with a user turn".to_string(),
                ));
            }
        }

        self.compact_locked(&model, false).await;

        let contents = {
            let mut history = self.history.lock().await;
            if !parts.is_empty() {
                history.append(Turn::user(parts));
            }
            sanitize(&history.read(true))
        };
        debug!(session_id = %self.session_id, model = %model, turns = contents.len(), "Sending request");

        let request = GenerateRequest {
            model: model.clone(),
            contents,
            tools,
            config: self.generation_config.clone(),
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EndpointError::Cancelled.into()),
            stream = self.endpoint.generate_stream(request) => stream?,
        };

        let mut response = ModelResponse::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EndpointError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            match next {
                Ok(chunk) => {
                    if !chunk.parts.is_empty() {
                        self.history.lock().await.append(Turn::model(chunk.parts.clone()));
                    }
                    response.parts.extend(chunk.parts);
                    response.finish_reason = chunk.finish_reason.or(response.finish_reason);
                    response.usage = chunk.usage.or(response.usage);
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        partial_parts = response.parts.len(),
                        "Response stream ended early"
                    );
                    return Err(e.into());
                }
            }
        }
        response.parts = merge_adjacent_text(response.parts);

        {
            let mut stats = self.stats.lock().await;
            stats.record_turn();
            if let Some(usage) = &response.usage {
                stats.record_usage(usage);
            }
        }
        self.persist_stats().await;

        Ok(response)
    }

    /// Guard each tool output and record them together as one user turn.
    pub async fn record_tool_results(
        &self,
        results: Vec<ToolResult>,
        context_remaining_percent: f64,
    ) -> Result<Vec<GuardResult>> {
        if results.is_empty() {
            return Err(ContextError::ProtocolViolation("no tool results to record".to_string()));
        }

        let _send = self.send_lock.lock().await;
        let model = self.model().await;

        let mut parts = Vec::with_capacity(results.len());
        let mut guarded = Vec::with_capacity(results.len());
        for result in results {
            let outcome = self
                .guard
                .guard(result.output, context_remaining_percent, &result.name, &model)
                .await;
            parts.push(Part::FunctionResponse(FunctionResponse::new(
                result.call_id.as_deref(),
                result.name,
                json!({ "output": plain_text(&outcome.parts) }),
            )));
            guarded.push(outcome);
        }

        self.history.lock().await.append(Turn::user(parts));
        Ok(guarded)
    }

    /// Run a file-touching operation after every earlier operation on any of
    /// `paths` has finished.
    pub fn run_file_operation<P, F, Fut, T>(
        &self,
        paths: &[P],
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        P: AsRef<Path>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queued = match paths {
            [single] => self
                .file_queue
                .enqueue(single.as_ref().to_path_buf(), operation)
                .left_future(),
            many => self.file_queue.enqueue_multiple(many, operation).right_future(),
        };
        async move { queued.await.map_err(ContextError::from) }
    }

    /// Compact if over the threshold, or unconditionally with `force`.
    pub async fn compact(&self, force: bool) -> CompactionOutcome {
        let _send = self.send_lock.lock().await;
        let model = self.model().await;
        self.compact_locked(&model, force).await
    }

    /// Compact so the history fits `target_model`, without switching to it.
    pub async fn compact_to_fit(&self, target_model: &str) -> CompactionOutcome {
        let _send = self.send_lock.lock().await;
        let model = self.model().await;
        let outcome = {
            let mut history = self.history.lock().await;
            self.compactor.compact_to_fit(&mut history, &model, target_model).await
        };
        self.record_outcome(&outcome).await;
        outcome
    }

    async fn compact_locked(&self, model: &str, force: bool) -> CompactionOutcome {
        let outcome = {
            let mut history = self.history.lock().await;
            self.compactor.maybe_compact(&mut history, model, force).await
        };
        self.record_outcome(&outcome).await;
        outcome
    }

    async fn record_outcome(&self, outcome: &CompactionOutcome) {
        if let Some(record) = outcome.record() {
            self.stats.lock().await.record_compaction(record);
            self.persist_stats().await;
        } else if let CompactionOutcome::Failed { reason } = outcome {
            warn!(session_id = %self.session_id, reason = %reason, "Compaction failed, continuing with full history");
        }
    }

    async fn persist_stats(&self) {
        if !self.persist_token_stats {
            return;
        }
        if let Some(store) = &self.store {
            let stats = self.stats.lock().await.clone();
            stats.persist(store.as_ref(), &self.session_id).await;
        }
    }

    /// Stop the artifact sweep, delete artifacts and save statistics.
    pub async fn shutdown(&self) {
        self.guard.shutdown().await;
        let removed = self.guard.cleanup().await;
        self.file_queue.clear();
        self.persist_stats().await;
        info!(session_id = %self.session_id, artifacts_removed = removed, "Session shut down");
    }
}
