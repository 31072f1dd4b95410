//! Call/result pairing: completing unanswered calls and sweeping orphan results

use super::{normalize_turns, SanitizeReport};
use crate::history::{CorrelationTable, FunctionResponse, Part, Turn};
use tracing::warn;

/// Give every call a result in the user turn that follows it.
///
/// Calls left unanswered (the user interrupted execution, or the turn never
/// completed) get a synthetic cancellation result. The results join the
/// following user turn when there is one, otherwise they form a new user
/// turn inserted right after the call.
pub fn complete_orphan_calls(turns: &mut Vec<Turn>, report: &mut SanitizeReport) {
    let mut i = 0;
    while i < turns.len() {
        if !turns[i].is_model() || !turns[i].has_function_calls() {
            i += 1;
            continue;
        }

        let mut table = CorrelationTable::new();
        for call in turns[i].function_calls() {
            table.open_call(call);
        }
        let next_is_user = turns.get(i + 1).map_or(false, Turn::is_user);
        if next_is_user {
            for response in turns[i + 1].function_responses() {
                table.resolve(response);
            }
        }

        if table.is_empty() {
            i += 1;
            continue;
        }

        let synthesized: Vec<Part> = table
            .pending()
            .iter()
            .map(|call| {
                warn!(
                    call = %call.name,
                    id = call.id.as_deref().unwrap_or("-"),
                    "Synthesizing cancellation for unanswered tool call"
                );
                Part::FunctionResponse(FunctionResponse::cancelled(call.id.clone(), call.name.clone()))
            })
            .collect();
        report.synthesized_cancellations += synthesized.len();

        if next_is_user {
            let next = &mut turns[i + 1];
            let at = next
                .parts
                .iter()
                .rposition(|p| matches!(p, Part::FunctionResponse(_)))
                .map_or(0, |idx| idx + 1);
            next.parts.splice(at..at, synthesized);
        } else {
            turns.insert(i + 1, Turn::user(synthesized));
        }
        i += 2;
    }
}

/// Drop every tool result that answers no outstanding call.
///
/// A result may only answer a call from the model turn directly before it,
/// and each call is answered once. User turns emptied by the sweep are
/// removed and the remaining turns re-merged so roles still alternate.
pub fn sweep_orphans(turns: Vec<Turn>) -> Vec<Turn> {
    let mut turns = turns;
    let mut report = SanitizeReport::default();
    sweep_orphans_with_report(&mut turns, &mut report);
    normalize_turns(&mut turns, &mut report);
    turns
}

pub(crate) fn sweep_orphans_with_report(turns: &mut Vec<Turn>, report: &mut SanitizeReport) {
    let mut table = CorrelationTable::new();

    for turn in turns.iter_mut() {
        if turn.is_model() {
            table.clear();
            for call in turn.function_calls() {
                table.open_call(call);
            }
            continue;
        }

        turn.parts.retain(|part| match part {
            Part::FunctionResponse(response) => {
                if table.resolve(response).is_some() {
                    true
                } else {
                    warn!(
                        name = %response.name,
                        id = response.id.as_deref().unwrap_or("-"),
                        "Dropping orphan tool result with no matching call"
                    );
                    report.orphans_dropped += 1;
                    false
                }
            }
            _ => true,
        });
        table.clear();
    }

    let before = turns.len();
    turns.retain(|turn| !(turn.is_user() && turn.is_empty()));
    report.turns_dropped += before - turns.len();
}
