//! Registry of live overflow artifacts with TTL expiry

use super::OverflowArtifact;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Artifacts written by the overflow guard, keyed by path
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    artifacts: DashMap<PathBuf, OverflowArtifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, artifact: OverflowArtifact) {
        self.artifacts.insert(artifact.path.clone(), artifact);
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.artifacts.contains_key(path)
    }

    /// Snapshot of live artifacts, oldest first
    pub fn list(&self) -> Vec<OverflowArtifact> {
        let mut artifacts: Vec<OverflowArtifact> = self.artifacts.iter().map(|e| e.value().clone()).collect();
        artifacts.sort_by_key(|a| a.created_at);
        artifacts
    }

    /// Delete artifacts whose TTL has passed at `now`. Returns how many were removed.
    pub async fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<PathBuf> = self
            .artifacts
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        self.remove_paths(expired).await
    }

    /// Delete every registered artifact. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let all: Vec<PathBuf> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        let removed = self.remove_paths(all).await;
        if removed > 0 {
            info!(removed, "Removed overflow artifacts");
        }
        removed
    }

    async fn remove_paths(&self, paths: Vec<PathBuf>) -> usize {
        let mut removed = 0;
        for path in paths {
            if self.artifacts.remove(&path).is_none() {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Deleted overflow artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete overflow artifact"),
            }
            removed += 1;
        }
        METRICS.record_artifacts_swept(removed);
        removed
    }

    /// Start the periodic expiry sweep. It stops when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        registry: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Overflow artifact sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.remove_expired(Utc::now()).await;
                        if removed > 0 {
                            debug!(removed, "Swept expired overflow artifacts");
                        }
                    }
                }
            }
        })
    }
}
