//! Overflow guard: storing, truncating and expiring oversized tool output

mod common;

use common::ScriptedEndpoint;
use session_context::config::OverflowConfig;
use session_context::overflow::{ArtifactStorage, TRUNCATION_MARKER};
use session_context::{ModelEndpoint, Part, ResponseOverflowGuard};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn guard_in(dir: &Path, config: OverflowConfig) -> ResponseOverflowGuard {
    let endpoint: Arc<dyn ModelEndpoint> = Arc::new(ScriptedEndpoint::default());
    ResponseOverflowGuard::with_storage(config, Some(endpoint), ArtifactStorage::new(dir))
}

fn single_line_json(bytes: usize) -> String {
    format!("{{\"rows\":\"{}\"}}", "r".repeat(bytes))
}

#[tokio::test]
async fn test_massive_single_line_json_is_stored() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = guard_in(tmp.path(), OverflowConfig::default());
    let payload = single_line_json(600 * 1024);

    let result = guard
        .guard(vec![Part::text(payload.clone())], 50.0, "fetch_table", "gemini-2.5-pro")
        .await;

    assert!(result.was_stored_as_file);
    assert!(!result.was_truncated);
    assert_eq!(result.parts.len(), 1);

    let message = result.parts[0].as_text().unwrap();
    assert!(message.len() <= 2_048, "guidance is {} bytes", message.len());

    let path = result.artifact.clone().unwrap();
    assert!(message.contains(&path.display().to_string()));
    let extension = path.extension().and_then(|e| e.to_str()).unwrap();
    assert!(extension == "json" || extension == "txt", "extension {}", extension);
    assert!(path.starts_with(tmp.path()));

    let stored = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(stored.len() >= payload.len());
    assert_eq!(guard.artifacts().len(), 1);

    assert_eq!(guard.cleanup().await, 1);
    assert!(!path.exists());
    guard.shutdown().await;
}

#[tokio::test]
async fn test_critical_budget_stores_even_moderate_output() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = guard_in(tmp.path(), OverflowConfig::default());
    let lines: Vec<String> = (0..3_000).map(|i| format!("line {} of the build log", i)).collect();

    let result = guard
        .guard(vec![Part::text(lines.join("\n"))], 5.0, "shell", "gemini-1.0-pro")
        .await;

    assert!(result.was_stored_as_file);
    assert_eq!(result.artifact.unwrap().extension().unwrap(), "json");
    guard.shutdown().await;
}

#[tokio::test]
async fn test_low_budget_truncates_below_double_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = guard_in(tmp.path(), OverflowConfig::default());
    let text: String = (0..6_000).map(|i| format!("entry {:05}\n", i)).collect::<String>() + &"z".repeat(80_000);

    let result = guard
        .guard(vec![Part::text(text.clone())], 15.0, "grep", "gemini-2.5-pro")
        .await;

    assert!(result.was_truncated);
    assert!(!result.was_stored_as_file);
    let kept = result.parts[0].as_text().unwrap();
    assert!(kept.ends_with(TRUNCATION_MARKER));
    assert!(kept.len() <= 100_000);
    assert!(text.starts_with(&kept[..kept.len() - TRUNCATION_MARKER.len()]));
    assert!(guard.artifacts().is_empty());
    guard.shutdown().await;
}

#[tokio::test]
async fn test_unwritable_directory_falls_back_to_truncation() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").unwrap();
    let guard = guard_in(&blocker, OverflowConfig::default());

    let result = guard
        .guard(vec![Part::text(single_line_json(300_000))], 50.0, "fetch", "gemini-2.5-pro")
        .await;

    assert!(result.was_truncated);
    assert!(!result.was_stored_as_file);
    assert!(result.parts[0].as_text().unwrap().len() <= 100_000);
    guard.shutdown().await;
}

#[tokio::test]
async fn test_expired_artifacts_are_swept() {
    let tmp = tempfile::tempdir().unwrap();
    let config = OverflowConfig {
        artifact_ttl_secs: 0,
        sweep_interval_secs: 1,
        ..OverflowConfig::default()
    };
    let guard = guard_in(tmp.path(), config);

    let result = guard
        .guard(vec![Part::text(single_line_json(200_000))], 50.0, "fetch", "gemini-2.5-pro")
        .await;
    let path = result.artifact.unwrap();
    assert!(path.exists());

    let mut swept = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if guard.artifacts().is_empty() && !path.exists() {
            swept = true;
            break;
        }
    }
    assert!(swept, "artifact outlived its ttl");
    guard.shutdown().await;
}
