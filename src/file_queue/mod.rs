//! Per-path serialization of file-touching operations
//!
//! Each normalized path maps to the tail of a chain of queued operations. An
//! operation starts once every earlier operation on its paths has settled;
//! operations on disjoint paths run concurrently. Operations run on spawned
//! tasks, so a caller that stops polling never stalls the chain.

use crate::metrics::METRICS;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Tail = Shared<BoxFuture<'static, ()>>;

/// File queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileQueueError {
    #[error("Queued file operation aborted before producing a result")]
    OperationAborted,
}

/// Normalize a path for use as a queue key.
///
/// Relative paths are resolved against the working directory, `.` and `..`
/// are folded lexically, and on case-insensitive filesystems (macOS,
/// Windows) the key is lowercased.
pub fn normalize_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    let key = normalized.to_string_lossy().into_owned();
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Serializes operations per file path
#[derive(Default)]
pub struct FileResourceQueue {
    chains: Mutex<HashMap<String, Tail>>,
}

impl FileResourceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn chains(&self) -> MutexGuard<'_, HashMap<String, Tail>> {
        self.chains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `operation` behind every earlier operation on `path`.
    ///
    /// The operation is registered when this is called, not when the returned
    /// future is first polled, so submission order is call order.
    pub fn enqueue<F, Fut, T>(
        &self,
        path: impl AsRef<Path>,
        operation: F,
    ) -> impl Future<Output = Result<T, FileQueueError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let key = normalize_path(path.as_ref());
        self.schedule(vec![key], "single", operation)
    }

    /// Queue `operation` behind every earlier operation on all of `paths`,
    /// as if it held all their locks at once.
    pub fn enqueue_multiple<P, F, Fut, T>(
        &self,
        paths: &[P],
        operation: F,
    ) -> impl Future<Output = Result<T, FileQueueError>> + Send + 'static
    where
        P: AsRef<Path>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut keys: Vec<String> = paths.iter().map(|p| normalize_path(p.as_ref())).collect();
        keys.sort();
        keys.dedup();
        self.schedule(keys, "multiple", operation)
    }

    fn schedule<F, Fut, T>(
        &self,
        keys: Vec<String>,
        mode: &'static str,
        operation: F,
    ) -> impl Future<Output = Result<T, FileQueueError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let tail: Tail = async move {
            let _ = done_rx.await;
        }
        .boxed()
        .shared();

        let previous: Vec<Tail> = {
            let mut chains = self.chains();
            keys.iter()
                .filter_map(|key| chains.insert(key.clone(), tail.clone()))
                .collect()
        };
        debug!(paths = ?keys, waiting_on = previous.len(), mode, "Queued file operation");

        let (result_tx, result_rx) = oneshot::channel();
        let queued_at = Instant::now();
        tokio::spawn(async move {
            join_all(previous).await;
            METRICS.record_file_queue(mode, queued_at.elapsed().as_secs_f64());

            let outcome = AssertUnwindSafe(async move { operation().await })
                .catch_unwind()
                .await;
            drop(done_tx);

            match outcome {
                Ok(value) => {
                    let _ = result_tx.send(value);
                }
                Err(_) => warn!(paths = ?keys, "Queued file operation panicked"),
            }
        });

        async move { result_rx.await.map_err(|_| FileQueueError::OperationAborted) }
    }

    /// Number of distinct paths with any recorded chain, settled or not
    pub fn size(&self) -> usize {
        self.chains().len()
    }

    /// Forget all chains without waiting for them.
    pub fn clear(&self) {
        self.chains().clear();
    }
}
