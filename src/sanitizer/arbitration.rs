//! Duplicate tool result arbitration
//!
//! Every tool result is attributed to the call it answers. When a call has
//! several results (an auto-cancellation followed by the real result, or a
//! name-only result next to an id-bearing one) exactly one survives: real
//! results beat the cancellation sentinel, exact id matches beat name
//! matches, and later arrivals beat earlier ones.

use super::SanitizeReport;
use crate::history::correlation::exact_id_match;
use crate::history::{call_matches, FunctionCall, FunctionResponse, Part, Role, Turn};
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CallSite {
    turn: usize,
    part: usize,
    call: FunctionCall,
}

#[derive(Debug, Clone)]
struct ResponseSite {
    turn: usize,
    part: usize,
    response: FunctionResponse,
}

fn collect_sites(turns: &[Turn]) -> (Vec<CallSite>, Vec<ResponseSite>) {
    let mut calls = Vec::new();
    let mut responses = Vec::new();

    for (t, turn) in turns.iter().enumerate() {
        for (p, part) in turn.parts.iter().enumerate() {
            match (turn.role, part) {
                (Role::Model, Part::FunctionCall(call)) => calls.push(CallSite {
                    turn: t,
                    part: p,
                    call: call.clone(),
                }),
                (Role::User, Part::FunctionResponse(response)) => responses.push(ResponseSite {
                    turn: t,
                    part: p,
                    response: response.clone(),
                }),
                _ => {}
            }
        }
    }

    (calls, responses)
}

/// Attribute each result to a preceding call. Exact id matches claim their
/// calls first, so an id-bearing result wins its call regardless of where it
/// arrived; the rest fall back to fuzzy then name matching, preferring
/// unclaimed calls from the nearest preceding turn.
fn attribute(calls: &[CallSite], responses: &[ResponseSite]) -> Vec<Option<usize>> {
    let mut assigned: Vec<Option<usize>> = vec![None; responses.len()];
    let mut claimed = vec![false; calls.len()];

    for (r, site) in responses.iter().enumerate() {
        if let Some(c) = calls
            .iter()
            .rposition(|c| c.turn < site.turn && exact_id_match(&c.call, &site.response))
        {
            assigned[r] = Some(c);
            claimed[c] = true;
        }
    }

    for (r, site) in responses.iter().enumerate() {
        if assigned[r].is_some() {
            continue;
        }
        let fuzzy = |c: &CallSite| c.turn < site.turn && call_matches(&c.call, &site.response);
        let by_name = |c: &CallSite| c.turn < site.turn && c.call.name == site.response.name;

        let unclaimed = |pred: &dyn Fn(&CallSite) -> bool| {
            calls
                .iter()
                .enumerate()
                .filter(|(i, c)| !claimed[*i] && pred(c))
                .min_by_key(|(_, c)| (Reverse(c.turn), c.part))
                .map(|(i, _)| i)
        };

        let pick = unclaimed(&fuzzy)
            .or_else(|| unclaimed(&by_name))
            .or_else(|| calls.iter().rposition(|c| fuzzy(c)))
            .or_else(|| calls.iter().rposition(|c| by_name(c)));

        if let Some(c) = pick {
            assigned[r] = Some(c);
            claimed[c] = true;
        }
    }

    assigned
}

/// Ranking of a candidate result for its call; the maximum wins.
fn rank(call: &FunctionCall, site: &ResponseSite, arrival: usize) -> (bool, bool, bool, usize) {
    (
        !site.response.is_cancellation(),
        exact_id_match(call, &site.response),
        site.response.id.as_deref().map_or(false, |id| !id.is_empty()),
        arrival,
    )
}

/// Keep exactly one result per call, realign its id to the call, and move it
/// into the user turn directly after the call when that turn exists.
pub fn arbitrate_responses(turns: &mut [Turn], report: &mut SanitizeReport) {
    let (calls, responses) = collect_sites(turns);
    if responses.is_empty() {
        return;
    }

    let assigned = attribute(&calls, &responses);
    let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for (r, call_idx) in assigned.iter().enumerate() {
        if let Some(c) = call_idx {
            groups.entry(*c).or_default().push(r);
        }
    }
    groups.sort_keys();

    let mut removals: HashSet<(usize, usize)> = HashSet::new();
    let mut insertions: BTreeMap<usize, Vec<((usize, usize), FunctionResponse)>> = BTreeMap::new();
    let mut call_id_updates: Vec<(usize, usize, String)> = Vec::new();
    // Call ids must stay unique across the history
    let mut taken_ids: HashSet<String> = calls
        .iter()
        .filter_map(|c| c.call.id.clone())
        .filter(|id| !id.is_empty())
        .collect();

    for (c, members) in &groups {
        let site = &calls[*c];
        let best = members
            .iter()
            .copied()
            .max_by_key(|r| rank(&site.call, &responses[*r], *r))
            .unwrap_or(members[0]);

        if members.len() > 1 {
            warn!(
                call = %site.call.name,
                candidates = members.len(),
                kept_cancellation = responses[best].response.is_cancellation(),
                "Arbitrated duplicate tool results for one call"
            );
            report.arbitration_overrides += members.len() - 1;
        }

        let mut kept = responses[best].response.clone();
        let kept_id = kept.id.clone();
        let mut realigned = false;
        let call_id = site.call.id.as_deref().filter(|id| !id.is_empty());
        let response_id = kept_id.as_deref().filter(|id| !id.is_empty());
        match (call_id, response_id) {
            (Some(call_id), Some(response_id)) if call_id == response_id => {}
            (Some(call_id), response_id) => {
                warn!(
                    call = %site.call.name,
                    call_id,
                    response_id = response_id.unwrap_or("-"),
                    "Realigning tool result id to its call"
                );
                kept.id = Some(call_id.to_string());
                realigned = true;
            }
            (None, Some(response_id)) if taken_ids.insert(response_id.to_string()) => {
                warn!(
                    call = %site.call.name,
                    response_id,
                    "Adopting tool result id on a call that had none"
                );
                call_id_updates.push((site.turn, site.part, response_id.to_string()));
                realigned = true;
            }
            (None, Some(response_id)) => {
                warn!(
                    call = %site.call.name,
                    response_id,
                    "Clearing tool result id already held by another call"
                );
                kept.id = None;
                realigned = true;
            }
            (None, None) => {
                if kept.id.is_some() {
                    kept.id = None;
                    realigned = true;
                }
            }
        }
        if realigned {
            report.ids_realigned += 1;
        }

        let next_is_user = turns.get(site.turn + 1).map_or(false, Turn::is_user);
        let target = if next_is_user {
            site.turn + 1
        } else {
            responses[best].turn
        };

        let untouched = members.len() == 1 && responses[best].turn == target && !realigned;
        if untouched {
            continue;
        }

        if responses[best].turn != target {
            debug!(
                call = %site.call.name,
                from = responses[best].turn,
                to = target,
                "Moving tool result next to its call"
            );
        }
        for r in members {
            removals.insert((responses[*r].turn, responses[*r].part));
        }
        insertions
            .entry(target)
            .or_default()
            .push(((site.turn, site.part), kept));
    }

    for (t, p, id) in call_id_updates {
        if let Some(Part::FunctionCall(call)) = turns[t].parts.get_mut(p) {
            call.id = Some(id);
        }
    }

    if removals.is_empty() && insertions.is_empty() {
        return;
    }

    for (t, turn) in turns.iter_mut().enumerate() {
        let inserts = insertions.remove(&t);
        let has_removals = removals.iter().any(|(rt, _)| *rt == t);
        if inserts.is_none() && !has_removals {
            continue;
        }

        let mut parts: Vec<Part> = std::mem::take(&mut turn.parts)
            .into_iter()
            .enumerate()
            .filter(|(p, _)| !removals.contains(&(t, *p)))
            .map(|(_, part)| part)
            .collect();

        if let Some(mut inserts) = inserts {
            inserts.sort_by_key(|(order, _)| *order);
            let head: Vec<Part> = inserts
                .into_iter()
                .map(|(_, response)| Part::FunctionResponse(response))
                .collect();
            parts.splice(0..0, head);
        }
        turn.parts = parts;
    }
}
