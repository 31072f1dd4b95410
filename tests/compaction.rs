//! Compaction boundary safety, atomicity and curation properties

mod common;

use async_trait::async_trait;
use common::{call, response, text_history, ScriptedEndpoint};
use session_context::compaction::prompts::SUMMARY_BRIDGE;
use session_context::config::CompactionConfig;
use session_context::endpoint::RetryPolicy;
use session_context::history::curate;
use session_context::{
    CompactionOutcome, EndpointError, HistoryCompactor, HistoryStore, ModelEndpoint, Part,
    Summarizer, Turn,
};
use std::sync::Arc;

struct FixedSummary(&'static str);

#[async_trait]
impl Summarizer for FixedSummary {
    async fn summarize(&self, _model: &str, _turns: &[Turn]) -> Result<String, EndpointError> {
        Ok(self.0.to_string())
    }
}

struct FailingSummary;

#[async_trait]
impl Summarizer for FailingSummary {
    async fn summarize(&self, _model: &str, _turns: &[Turn]) -> Result<String, EndpointError> {
        Err(EndpointError::Http {
            status: 451,
            message: "unavailable in region".into(),
        })
    }
}

fn compactor(endpoint: ScriptedEndpoint, summarizer: Arc<dyn Summarizer>) -> HistoryCompactor {
    let endpoint: Arc<dyn ModelEndpoint> = Arc::new(endpoint);
    HistoryCompactor::new(endpoint, CompactionConfig::default(), RetryPolicy::no_retry())
        .with_summarizer(summarizer)
}

/// 100 turns where turn 61 is a lone tool call and turn 62 its result.
fn history_with_call_at_61() -> Vec<Turn> {
    let mut turns = text_history(100, 400);
    turns[61] = Turn::model(vec![call("61", "grep")]);
    turns[62] = Turn::user(vec![response("61", "grep", &"m".repeat(400))]);
    turns
}

fn call_and_result_together(turns: &[Turn]) -> bool {
    match turns
        .iter()
        .position(|t| t.function_calls().any(|c| c.id.as_deref() == Some("61")))
    {
        Some(i) => turns
            .get(i + 1)
            .map_or(false, |next| next.function_responses().any(|r| r.id.as_deref() == Some("61"))),
        None => turns.iter().all(|t| !t.has_function_responses()),
    }
}

#[tokio::test]
async fn test_boundary_never_splits_call_from_result() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FixedSummary("summary")));
    let history = history_with_call_at_61();

    for step in 1..=100 {
        let fraction = step as f64 / 100.0;
        let (outcome, rebuilt) = compactor.compact_turns(&history, "gemini-2.5-pro", fraction).await;

        match outcome {
            CompactionOutcome::Compacted(record) => {
                assert_ne!(record.boundary_index, 62, "split the pair at fraction {}", fraction);
                let rebuilt = rebuilt.unwrap();
                assert!(call_and_result_together(&rebuilt), "pair broken at fraction {}", fraction);
                assert!(rebuilt.windows(2).all(|w| w[0].role != w[1].role));
            }
            CompactionOutcome::SkippedBoundaryNotFound => assert!(rebuilt.is_none()),
            other => panic!("unexpected outcome {:?} at fraction {}", other, fraction),
        }
    }
}

#[tokio::test]
async fn test_default_fraction_keeps_pair_out_of_summary_window() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FixedSummary("summary")));
    let (outcome, rebuilt) = compactor
        .compact_turns(&history_with_call_at_61(), "gemini-2.5-pro", 0.3)
        .await;

    let record = outcome.record().cloned().unwrap();
    assert!(record.boundary_index >= 63);
    assert!(record.new_token_count < record.original_token_count);

    let rebuilt = rebuilt.unwrap();
    assert_eq!(rebuilt[2].text(), SUMMARY_BRIDGE);
    assert_eq!(rebuilt[3].text(), "summary");
    assert!(rebuilt[4].is_user());
}

#[tokio::test]
async fn test_empty_summary_leaves_ledger_byte_identical() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FixedSummary("   ")));
    let mut store = HistoryStore::with_turns(history_with_call_at_61());
    let before = serde_json::to_string(&store.read(false)).unwrap();

    let outcome = compactor.compact(&mut store, "gemini-2.5-pro", 0.3).await;

    assert_eq!(
        outcome,
        CompactionOutcome::Failed {
            reason: "empty summary".into()
        }
    );
    assert_eq!(serde_json::to_string(&store.read(false)).unwrap(), before);
}

#[tokio::test]
async fn test_summarizer_error_leaves_ledger_untouched() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FailingSummary));
    let mut store = HistoryStore::with_turns(text_history(20, 200));
    let before = store.read(false);

    let outcome = compactor.compact(&mut store, "gemini-2.5-pro", 0.3).await;

    assert!(matches!(outcome, CompactionOutcome::Failed { .. }));
    assert_eq!(store.read(false), before);
}

#[tokio::test]
async fn test_threshold_triggers_compaction() {
    // 40 turns of ~300 bytes is roughly 3,000 tokens against a 3,200-token window
    let endpoint = ScriptedEndpoint::default().with_limit(3_200);
    let compactor = compactor(endpoint, Arc::new(FixedSummary("short recap")));
    let mut store = HistoryStore::with_turns(text_history(40, 300));
    let before = store.len();

    let outcome = compactor.maybe_compact(&mut store, "small-model", false).await;

    assert!(outcome.is_compacted(), "{:?}", outcome);
    assert!(store.len() < before);
    assert!(store.read(true).iter().any(|t| t.text() == "short recap"));
}

#[tokio::test]
async fn test_compaction_rebuilds_raw_ledger_from_curated_view() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FixedSummary("short recap")));
    let mut turns = text_history(40, 300);
    turns[5] = Turn::model(vec![Part::text("")]);
    let mut store = HistoryStore::with_turns(turns);
    assert_ne!(store.read(false), store.read(true));

    let outcome = compactor.compact(&mut store, "small-model", 0.3).await;

    assert!(outcome.is_compacted(), "{:?}", outcome);
    assert_eq!(store.read(false), store.read(true));
    assert!(store.read(false).iter().all(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_below_threshold_is_no_action() {
    let compactor = compactor(ScriptedEndpoint::default(), Arc::new(FixedSummary("unused")));
    let mut store = HistoryStore::with_turns(text_history(10, 50));

    let outcome = compactor.maybe_compact(&mut store, "gemini-2.5-pro", false).await;

    assert!(matches!(outcome, CompactionOutcome::NoAction { .. }));
    assert_eq!(store.len(), 10);
}

#[tokio::test]
async fn test_fit_to_smaller_model() {
    let endpoint = ScriptedEndpoint::default();
    let compactor = compactor(endpoint, Arc::new(FixedSummary("recap")));
    let mut store = HistoryStore::with_turns(text_history(200, 1_000));

    // Already fits a 1M window
    let outcome = compactor
        .compact_to_fit(&mut store, "gemini-2.5-pro", "gemini-2.5-flash")
        .await;
    assert!(matches!(outcome, CompactionOutcome::NoAction { .. }));

    // Roughly 52k tokens cannot fit a 32k window
    let outcome = compactor
        .compact_to_fit(&mut store, "gemini-2.5-pro", "gemini-1.0-pro")
        .await;
    assert!(outcome.is_compacted(), "{:?}", outcome);
}

#[test]
fn test_curated_read_is_idempotent() {
    let mut store = HistoryStore::new();
    store.append(Turn::user_text("a"));
    store.append(Turn::model(vec![Part::thought("plan"), Part::text("answer a")]));
    store.append(Turn::user_text("b"));
    store.append(Turn::model(vec![Part::text("")]));
    store.append(Turn::user_text("c"));
    store.append(Turn::user_text("d"));
    store.append(Turn::model(vec![Part::thought("only thinking")]));
    store.append(Turn::user_text("e"));
    store.append(Turn::model(vec![call("1", "grep")]));
    store.append(Turn::user(vec![response("1", "grep", "hit")]));

    let first = store.read(true);
    let second = store.read(true);
    assert_eq!(first, second);
    assert_eq!(curate(&first), first);
    assert!(first.iter().flat_map(|t| &t.parts).all(|p| !p.is_thought()));
}
