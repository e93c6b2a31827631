//! Prompts for model-backed summarizers

use crate::memory::types::Turn;

/// Consolidation prompt
///
/// Placeholder: {conversation} - the formatted window of turns
pub const CONSOLIDATION_PROMPT: &str = r#"Summarize the following conversation excerpt for long-term memory.

Write a short summary of what was discussed, then list durable facts worth remembering:
- Stable preferences, background, goals and relationships of participants
- Decisions or agreements reached
- Facts that replace something said earlier (name the old fact in "supersedes")

Do NOT include small talk, greetings or information only relevant in the moment.

Conversation:
{conversation}

Respond with a single JSON object in this exact format:
{
  "summary": "Alice and Bob compared favourite drinks.",
  "facts": [
    {"content": "Alice likes green tea", "user_id": "alice-id"},
    {"content": "Bob moved to Oslo", "supersedes": "Bob lives in Berlin"}
  ]
}

Only include the JSON object, no other text."#;

/// One line per turn: `[timestamp] speaker: text`
pub fn format_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("[{}] {}: {}", t.timestamp.to_rfc3339(), t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The consolidation prompt filled in with `turns`
pub fn consolidation_prompt(turns: &[Turn]) -> String {
    CONSOLIDATION_PROMPT.replace("{conversation}", &format_turns(turns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Scope;

    #[test]
    fn test_prompt_contains_turns() {
        let turns = vec![
            Turn::new("alice", "I like tea", Scope::global()),
            Turn::new("bob", "I prefer coffee", Scope::global()),
        ];
        let prompt = consolidation_prompt(&turns);

        assert!(prompt.contains("alice: I like tea"));
        assert!(prompt.contains("bob: I prefer coffee"));
        assert!(!prompt.contains("{conversation}"));
    }
}
