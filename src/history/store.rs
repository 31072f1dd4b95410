//! Append-only turn ledger with a curated read view

use super::models::{merge_adjacent_text, Part, Turn};
use tracing::{debug, warn};

/// Ledger of every turn recorded for a session.
///
/// The raw ledger is the audit trail and may hold invalid model output and
/// empty alternation placeholders. The curated view is what gets resent.
#[derive(Debug, Default, Clone)]
pub struct HistoryStore {
    turns: Vec<Turn>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing turns (for example, restored environment turns).
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        let mut store = Self::new();
        for turn in turns {
            store.append(turn);
        }
        store
    }

    /// Record a turn.
    ///
    /// Model turns arriving back to back (streamed chunks, or several tool
    /// calls emitted across chunks) collapse into one logical turn, with
    /// adjacent text concatenated. A user turn that directly follows a turn of
    /// tool results joins it, results first. Any other user turn that directly
    /// follows a user turn gets an empty model placeholder in between so the
    /// unanswered prompt drops out of the curated view.
    pub fn append(&mut self, mut turn: Turn) {
        if turn.is_model() {
            if let Some(last) = self.turns.last_mut() {
                if last.is_model() && !last.is_empty() && !turn.is_empty() {
                    last.parts.append(&mut turn.parts);
                    let parts = std::mem::take(&mut last.parts);
                    last.parts = merge_adjacent_text(parts);
                    debug!(turn_id = %last.turn_id, parts = last.parts.len(), "Consolidated model turn");
                    return;
                }
            }
            turn.parts = merge_adjacent_text(turn.parts);
        } else if let Some(last) = self.turns.last_mut().filter(|t| t.is_user()) {
            if last.has_function_responses() {
                // Tool results are an answer, not an unanswered prompt
                let (mut results, rest): (Vec<Part>, Vec<Part>) = std::mem::take(&mut last.parts)
                    .into_iter()
                    .chain(turn.parts)
                    .partition(|p| matches!(p, Part::FunctionResponse(_)));
                results.extend(rest);
                last.parts = results;
                debug!(turn_id = %last.turn_id, parts = last.parts.len(), "Merged user parts into tool results turn");
                return;
            }
            debug!("Inserting empty model placeholder between consecutive user turns");
            self.turns.push(Turn::model(Vec::new()));
        }

        self.turns.push(turn);
    }

    /// Read the history as a deep copy: raw ledger, or the curated view.
    pub fn read(&self, curated: bool) -> Vec<Turn> {
        if curated {
            curate(&self.turns)
        } else {
            self.turns.clone()
        }
    }

    /// Swap the whole ledger in one step.
    pub fn replace(&mut self, turns: Vec<Turn>) {
        debug!(old = self.turns.len(), new = turns.len(), "Replacing history ledger");
        self.turns = turns;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

fn is_valid_model_turn(turn: &Turn) -> bool {
    !turn.parts.is_empty() && turn.parts.iter().all(Part::is_well_formed)
}

/// Build the curated view of a ledger.
///
/// User turns are kept. Each run of consecutive model turns is kept (merged
/// into one turn, thoughts removed) only if every turn in it is well formed
/// and something other than thoughts remains; otherwise the run and the user
/// turn that prompted it are dropped together.
pub fn curate(turns: &[Turn]) -> Vec<Turn> {
    let mut curated: Vec<Turn> = Vec::with_capacity(turns.len());
    let mut i = 0;

    while i < turns.len() {
        if turns[i].is_user() {
            curated.push(turns[i].clone());
            i += 1;
            continue;
        }

        let start = i;
        while i < turns.len() && turns[i].is_model() {
            i += 1;
        }
        let run = &turns[start..i];

        let valid = run.iter().all(is_valid_model_turn);
        let parts: Vec<Part> = run
            .iter()
            .flat_map(|turn| turn.parts.iter().filter(|p| !p.is_thought()).cloned())
            .collect();

        if valid && !parts.is_empty() {
            let mut merged = run[0].clone();
            merged.parts = merge_adjacent_text(parts);
            curated.push(merged);
        } else {
            if valid {
                debug!(turns = run.len(), "Dropping thought-only model output and its prompt");
            } else {
                warn!(turns = run.len(), "Dropping invalid model output and its prompt");
            }
            if curated.last().map_or(false, Turn::is_user) {
                curated.pop();
            }
        }
    }

    curated
}
