//! Request sanitization
//!
//! Repairs a candidate request (curated history plus the new user turn) into
//! a protocol-valid message list: every tool call answered exactly once,
//! results leading their turn, no reasoning parts, strict role alternation.
//! Anomalies are repaired and logged, never raised.

pub mod arbitration;
pub mod pairing;

pub use pairing::sweep_orphans;

use crate::history::{merge_adjacent_text, Part, Role, Turn};
use crate::metrics::METRICS;
use serde::Serialize;
use tracing::{debug, warn};

/// Counts of every repair applied during one sanitize call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub thoughts_stripped: usize,
    pub misplaced_parts_dropped: usize,
    pub arbitration_overrides: usize,
    pub ids_realigned: usize,
    pub synthesized_cancellations: usize,
    pub responses_reordered: usize,
    pub orphans_dropped: usize,
    pub turns_dropped: usize,
    pub turns_merged: usize,
}

impl SanitizeReport {
    pub fn total_repairs(&self) -> usize {
        self.thoughts_stripped
            + self.misplaced_parts_dropped
            + self.arbitration_overrides
            + self.ids_realigned
            + self.synthesized_cancellations
            + self.responses_reordered
            + self.orphans_dropped
            + self.turns_dropped
            + self.turns_merged
    }

    pub fn is_clean(&self) -> bool {
        self.total_repairs() == 0
    }
}

/// Repair a candidate request into a protocol-valid message list.
pub fn sanitize(raw_contents: &[Turn]) -> Vec<Turn> {
    sanitize_with_report(raw_contents).0
}

/// Same as [`sanitize`], also returning what was repaired.
///
/// Passes run in a fixed order; each assumes the output of the previous one.
pub fn sanitize_with_report(raw_contents: &[Turn]) -> (Vec<Turn>, SanitizeReport) {
    let mut report = SanitizeReport::default();

    let mut turns = strip_unsendable_parts(raw_contents, &mut report);
    normalize_turns(&mut turns, &mut report);

    arbitration::arbitrate_responses(&mut turns, &mut report);
    normalize_turns(&mut turns, &mut report);

    pairing::complete_orphan_calls(&mut turns, &mut report);
    order_responses_first(&mut turns, &mut report);
    pairing::sweep_orphans_with_report(&mut turns, &mut report);
    normalize_turns(&mut turns, &mut report);

    if report.is_clean() {
        debug!(turns = turns.len(), "Request sanitized without repairs");
    } else {
        debug!(?report, "Request sanitized with repairs");
    }
    METRICS.record_sanitize_report(&report);

    (turns, report)
}

/// Drop thoughts, and tool parts that sit on the wrong side of the protocol
/// (results on model turns, calls on user turns).
fn strip_unsendable_parts(raw: &[Turn], report: &mut SanitizeReport) -> Vec<Turn> {
    raw.iter()
        .map(|turn| {
            let mut turn = turn.clone();
            let role = turn.role;
            turn.parts.retain(|part| match (role, part) {
                (_, Part::Thought { .. }) => {
                    report.thoughts_stripped += 1;
                    false
                }
                (Role::Model, Part::FunctionResponse(response)) => {
                    warn!(name = %response.name, "Dropping tool result found on a model turn");
                    report.misplaced_parts_dropped += 1;
                    false
                }
                (Role::User, Part::FunctionCall(call)) => {
                    warn!(name = %call.name, "Dropping tool call found on a user turn");
                    report.misplaced_parts_dropped += 1;
                    false
                }
                _ => true,
            });
            turn
        })
        .collect()
}

/// Remove empty turns and merge adjacent same-role turns so roles alternate.
pub(crate) fn normalize_turns(turns: &mut Vec<Turn>, report: &mut SanitizeReport) {
    let before = turns.len();
    turns.retain(|turn| !turn.is_empty());
    report.turns_dropped += before - turns.len();

    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns.drain(..) {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                debug!(role = %turn.role, "Merging adjacent turns with the same role");
                last.parts.extend(turn.parts);
                if last.is_model() {
                    let parts = std::mem::take(&mut last.parts);
                    last.parts = merge_adjacent_text(parts);
                }
                report.turns_merged += 1;
            }
            _ => merged.push(turn),
        }
    }
    *turns = merged;
}

/// Some providers require tool results to open the user turn.
fn order_responses_first(turns: &mut [Turn], report: &mut SanitizeReport) {
    for turn in turns.iter_mut().filter(|t| t.is_user()) {
        let first_other = turn
            .parts
            .iter()
            .position(|p| !matches!(p, Part::FunctionResponse(_)));
        let needs_reorder = match first_other {
            Some(idx) => turn.parts[idx..]
                .iter()
                .any(|p| matches!(p, Part::FunctionResponse(_))),
            None => false,
        };
        if !needs_reorder {
            continue;
        }

        let (responses, others): (Vec<Part>, Vec<Part>) = std::mem::take(&mut turn.parts)
            .into_iter()
            .partition(|p| matches!(p, Part::FunctionResponse(_)));
        debug!(
            turn_id = %turn.turn_id,
            responses = responses.len(),
            "Moving tool results ahead of other parts"
        );
        turn.parts = responses;
        turn.parts.extend(others);
        report.responses_reordered += 1;
    }
}
