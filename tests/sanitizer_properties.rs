//! Pairing and arbitration properties of request sanitization

mod common;

use common::{call, response};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use session_context::{
    sanitize, sanitize_with_report, FunctionCall, FunctionResponse, HistoryStore, Part, Turn,
};
use std::collections::HashSet;

const TOOL_NAMES: [&str; 3] = ["grep", "read_file", "shell"];

/// Every call is answered exactly once by the next turn, and every result
/// answers a call from the turn before it.
fn assert_paired(turns: &[Turn]) {
    for (i, turn) in turns.iter().enumerate() {
        if turn.is_model() && turn.has_function_calls() {
            let next = turns.get(i + 1).unwrap_or_else(|| panic!("call turn {} has no successor", i));
            assert!(next.is_user(), "call turn {} not followed by a user turn", i);

            let mut call_ids: Vec<_> = turn.function_calls().map(|c| c.id.clone()).collect();
            let mut response_ids: Vec<_> = next.function_responses().map(|r| r.id.clone()).collect();
            call_ids.sort();
            response_ids.sort();
            assert_eq!(call_ids, response_ids, "pairing broken at turn {}", i);
        }
        if turn.is_user() && turn.has_function_responses() {
            assert!(i > 0 && turns[i - 1].is_model(), "results at turn {} have no call turn", i);
            assert!(turns[i - 1].has_function_calls(), "orphan results at turn {}", i);
        }
    }
}

fn assert_unique_call_ids(turns: &[Turn]) {
    let mut seen = HashSet::new();
    for call in turns.iter().flat_map(Turn::function_calls) {
        if let Some(id) = &call.id {
            assert!(seen.insert(id.clone()), "call id {} used twice", id);
        }
    }
}

fn id_less_call(name: &str) -> Part {
    Part::FunctionCall(FunctionCall::new(None, name, json!({})))
}

fn result_with(id: Option<&str>, name: &str, output: &str) -> Part {
    Part::FunctionResponse(FunctionResponse::new(id, name, json!({ "output": output })))
}

fn assert_alternates(turns: &[Turn]) {
    assert!(turns.windows(2).all(|w| w[0].role != w[1].role), "roles do not alternate");
    assert!(turns.iter().all(|t| !t.is_empty()), "empty turn in output");
}

/// History with unanswered calls, duplicate and late results, orphans,
/// id-less calls, results with a missing or stray id, thoughts and split
/// model turns.
fn messy_history(rng: &mut StdRng) -> Vec<Turn> {
    let mut turns = vec![Turn::user_text("start")];
    let mut next_id = 0;
    let mut late: Vec<Part> = Vec::new();

    for round in 0..rng.gen_range(1..8) {
        let mut model_parts = Vec::new();
        if rng.gen_bool(0.3) {
            model_parts.push(Part::thought("thinking"));
        }
        if rng.gen_bool(0.5) {
            model_parts.push(Part::text(format!("step {}", round)));
        }
        let mut calls = Vec::new();
        for _ in 0..rng.gen_range(0..4) {
            let name = TOOL_NAMES[rng.gen_range(0..TOOL_NAMES.len())];
            if rng.gen_bool(0.25) {
                calls.push((None, name));
                model_parts.push(id_less_call(name));
            } else {
                let id = format!("c{}", next_id);
                next_id += 1;
                calls.push((Some(id.clone()), name));
                model_parts.push(call(&id, name));
            }
        }
        if model_parts.is_empty() {
            model_parts.push(Part::text("nothing to do"));
        }

        if rng.gen_bool(0.2) && model_parts.len() > 1 {
            let tail = model_parts.split_off(1);
            turns.push(Turn::model(model_parts));
            turns.push(Turn::model(tail));
        } else {
            turns.push(Turn::model(model_parts));
        }

        let mut user_parts: Vec<Part> = std::mem::take(&mut late);
        for (id, name) in &calls {
            match rng.gen_range(0..7) {
                0 => {}
                1 => {
                    user_parts.push(Part::FunctionResponse(FunctionResponse::cancelled(id.clone(), *name)));
                    user_parts.push(result_with(id.as_deref(), name, "real"));
                }
                2 => {
                    user_parts.push(Part::FunctionResponse(FunctionResponse::cancelled(id.clone(), *name)));
                    late.push(result_with(id.as_deref(), name, "late"));
                }
                // Provider dropped the id on the result
                3 => user_parts.push(result_with(None, name, "real")),
                // Result carries an id no call was given
                4 => user_parts.push(result_with(Some("stray"), name, "real")),
                _ => user_parts.push(result_with(id.as_deref(), name, "real")),
            }
        }
        if rng.gen_bool(0.2) {
            user_parts.push(response("ghost", "grep", "stale"));
        }
        if rng.gen_bool(0.5) || user_parts.is_empty() {
            user_parts.push(Part::text(format!("user {}", round)));
        }
        turns.push(Turn::user(user_parts));
    }

    turns
}

#[test]
fn test_pairing_closure_on_messy_histories() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for case in 0..1_000 {
        let history = messy_history(&mut rng);
        let sanitized = sanitize(&history);

        assert_paired(&sanitized);
        assert_unique_call_ids(&sanitized);
        assert_alternates(&sanitized);
        assert!(
            sanitized.iter().flat_map(|t| &t.parts).all(|p| !p.is_thought()),
            "thought survived in case {}",
            case
        );
    }
}

#[test]
fn test_sanitize_is_stable_on_its_own_output() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..100 {
        let once = sanitize(&messy_history(&mut rng));
        let (twice, report) = sanitize_with_report(&once);
        assert_eq!(twice, once);
        assert!(report.is_clean(), "{:?}", report);
    }
}

#[test]
fn test_real_result_beats_cancellation_in_either_order() {
    for cancellation_first in [true, false] {
        let cancelled = Part::FunctionResponse(FunctionResponse::cancelled(Some("1".into()), "grep"));
        let real = response("1", "grep", "found it");
        let results = if cancellation_first {
            vec![cancelled, real]
        } else {
            vec![real, cancelled]
        };

        let sanitized = sanitize(&[
            Turn::user_text("search"),
            Turn::model(vec![call("1", "grep")]),
            Turn::user(results),
        ]);

        let kept: Vec<_> = sanitized[2].function_responses().collect();
        assert_eq!(kept.len(), 1);
        assert!(!kept[0].is_cancellation());
        assert_eq!(kept[0].response["output"], "found it");
    }
}

#[test]
fn test_late_real_result_replaces_cancellation_across_turns() {
    let sanitized = sanitize(&[
        Turn::user_text("search"),
        Turn::model(vec![call("1", "grep")]),
        Turn::user(vec![Part::FunctionResponse(FunctionResponse::cancelled(
            Some("1".into()),
            "grep",
        ))]),
        Turn::model_text("moving on"),
        Turn::user(vec![response("1", "grep", "finished late"), Part::text("also")]),
    ]);

    assert_paired(&sanitized);
    let kept: Vec<_> = sanitized[2].function_responses().collect();
    assert_eq!(kept[0].response["output"], "finished late");
    assert_eq!(sanitized[4].parts, vec![Part::text("also")]);
}

#[test]
fn test_interrupted_call_gets_cancellation_result() {
    let mut store = HistoryStore::new();
    store.append(Turn::user_text("hi"));
    store.append(Turn::model(vec![call("1", "grep")]));

    let sanitized = sanitize(&store.read(true));

    assert_eq!(sanitized.len(), 3);
    assert!(sanitized[2].is_user());
    let synthetic = sanitized[2].parts[0].as_function_response().unwrap();
    assert_eq!(synthetic.id.as_deref(), Some("1"));
    assert_eq!(synthetic.name, "grep");
    assert!(synthetic.is_cancellation());

    // The ledger itself is untouched
    assert_eq!(store.len(), 2);
}
