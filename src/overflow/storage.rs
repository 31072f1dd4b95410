//! Artifact directory resolution and file writing

use super::ArtifactKind;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory under the project or home directory holding artifacts
pub const ARTIFACT_SUBDIR: &str = ".session-context/tmp/overflow";

const MAX_TOOL_NAME_LEN: usize = 64;

/// Writes overflow artifacts into one resolved directory
#[derive(Debug, Clone)]
pub struct ArtifactStorage {
    dir: PathBuf,
}

impl ArtifactStorage {
    /// Use `dir` as is, without the fallback chain.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve the artifact directory: the explicit directory, then
    /// `<cwd>/.session-context/tmp/overflow`, then the same under the home
    /// directory, then the OS temp directory. The first that can be created wins.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = explicit {
            candidates.push(dir.to_path_buf());
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(ARTIFACT_SUBDIR));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(ARTIFACT_SUBDIR));
        }
        let os_temp = std::env::temp_dir().join("session-context-overflow");

        for candidate in candidates {
            match std::fs::create_dir_all(&candidate) {
                Ok(()) => {
                    debug!(dir = %candidate.display(), "Resolved overflow artifact directory");
                    return Self::new(candidate);
                }
                Err(e) => {
                    warn!(dir = %candidate.display(), error = %e, "Overflow directory unusable, trying next");
                }
            }
        }
        Self::new(os_temp)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to a new artifact file named after the tool and time.
    pub async fn write(&self, tool_name: &str, kind: ArtifactKind, content: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(artifact_file_name(tool_name, kind));
        fs::write(&path, content).await?;
        debug!(path = %path.display(), bytes = content.len(), ?kind, "Wrote overflow artifact");
        Ok(path)
    }
}

/// Reduce a tool name to characters safe in a file name.
pub fn sanitize_tool_name(tool_name: &str) -> String {
    let cleaned: String = tool_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_TOOL_NAME_LEN)
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<tool>_<timestamp>_<random>.<ext>`
pub fn artifact_file_name(tool_name: &str, kind: ArtifactKind) -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.{}",
        sanitize_tool_name(tool_name),
        timestamp,
        &suffix[..8],
        kind.extension()
    )
}
