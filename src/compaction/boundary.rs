//! Compaction boundary selection
//!
//! The boundary is the index of the first turn kept verbatim. Everything
//! before it is summarized. A boundary is safe when no tool call before it
//! has its result at or after it.

use crate::history::Turn;

/// Index where a suffix holding at most `preserve_fraction` of the total
/// serialized bytes begins, scanning from the newest turn backward.
///
/// Returns `turns.len()` when even the newest turn alone exceeds the share.
pub fn tentative_boundary(turns: &[Turn], preserve_fraction: f64) -> usize {
    let sizes: Vec<usize> = turns.iter().map(Turn::serialized_len).collect();
    let total: usize = sizes.iter().sum();
    let budget = total as f64 * preserve_fraction;

    let mut kept = 0usize;
    let mut index = turns.len();
    for (i, size) in sizes.iter().enumerate().rev() {
        if (kept + size) as f64 > budget {
            break;
        }
        kept += size;
        index = i;
    }
    index
}

/// True when splitting before `index` keeps every call with its result.
pub fn is_safe_boundary(turns: &[Turn], index: usize) -> bool {
    if index == 0 || index >= turns.len() {
        return false;
    }
    !turns[index].has_function_responses() && !turns[index - 1].has_function_calls()
}

/// Pick a safe boundary near the tentative one.
///
/// Order of preference: the first user turn at or after the tentative index
/// that opens no tool results and follows no tool calls; else the last model
/// turn with text; else the first safe index at or after the tentative one.
/// `None` when nothing qualifies.
pub fn find_boundary(turns: &[Turn], preserve_fraction: f64) -> Option<usize> {
    let tentative = tentative_boundary(turns, preserve_fraction);

    let user_boundary =
        (tentative.max(1)..turns.len()).find(|&i| turns[i].is_user() && is_safe_boundary(turns, i));
    if user_boundary.is_some() {
        return user_boundary;
    }

    let model_text_boundary = (1..turns.len())
        .rev()
        .find(|&i| turns[i].is_model() && turns[i].has_text() && is_safe_boundary(turns, i));
    if model_text_boundary.is_some() {
        return model_text_boundary;
    }

    if tentative == 0 {
        return None;
    }
    (tentative..turns.len()).find(|&i| is_safe_boundary(turns, i))
}
