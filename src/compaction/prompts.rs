//! Prompt text for history summarization

use crate::history::Turn;

pub const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are a context summarization assistant. You read the earlier part of a conversation between a user and an AI coding agent and produce a structured snapshot that lets the agent continue the work without the original messages.\n\nDo NOT continue the conversation. Do NOT answer questions found in it. Output ONLY the snapshot.";

pub const SUMMARIZATION_REQUEST: &str = "Summarize the conversation above into a context snapshot using exactly these sections:\n\n## Goal\n[What the user is trying to accomplish]\n\n## Constraints & Preferences\n- [Requirements stated by the user, or \"(none)\"]\n\n## Progress\n- [Completed work]\n- [Work in progress]\n\n## Key Decisions\n- [Decision]: [short rationale]\n\n## Files & Artifacts\n- [Exact paths, function names and error messages that still matter]\n\n## Next Steps\n1. [What should happen next]\n\nBe concise. Preserve exact identifiers.";

/// Model acknowledgment appended when the summarized prefix ends on a user turn.
pub const PREFIX_ACKNOWLEDGMENT: &str = "Understood.";

/// User line placed before the summary when the preceding turn is a model turn.
pub const SUMMARY_BRIDGE: &str = "What have we accomplished so far?";

/// Contents of a summarization request: the purified prefix, an
/// acknowledgment when it would otherwise end on a user turn, then the
/// summarization instruction.
pub fn summarization_contents(purified: &[Turn]) -> Vec<Turn> {
    let mut contents = purified.to_vec();
    if contents.last().map_or(false, Turn::is_user) {
        contents.push(Turn::model_text(PREFIX_ACKNOWLEDGMENT));
    }
    contents.push(Turn::user_text(SUMMARIZATION_REQUEST));
    contents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_inserted_after_trailing_user_turn() {
        let contents = summarization_contents(&[Turn::user_text("a"), Turn::model_text("b"), Turn::user_text("c")]);
        assert_eq!(contents.len(), 5);
        assert!(contents[3].is_model());
        assert_eq!(contents[3].text(), PREFIX_ACKNOWLEDGMENT);
        assert_eq!(contents[4].text(), SUMMARIZATION_REQUEST);
    }

    #[test]
    fn test_no_ack_after_model_turn() {
        let contents = summarization_contents(&[Turn::user_text("a"), Turn::model_text("b")]);
        assert_eq!(contents.len(), 3);
        assert!(contents[2].is_user());
    }
}
