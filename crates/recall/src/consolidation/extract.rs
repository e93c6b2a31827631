//! Structured payload extraction from model output
//!
//! Models wrap JSON in prose, code fences or both, and may mention brackets
//! inside string values. The scanner tracks nesting depth and string
//! literals so that a `]` inside a quoted value never ends a payload early.

use serde::Deserialize;
use serde_json::Value;

use crate::consolidation::summarizer::{Consolidation, FactCandidate, SummarizerError};

/// Span of the balanced bracket group starting at byte `start`, if any.
///
/// Brackets inside JSON string literals (including escaped quotes) are
/// ignored. A mismatched closer ends the attempt.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().copied().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(byte) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first balanced top-level `{...}` or `[...]` in `text` that is valid JSON
pub fn find_structured_payload(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(start, _)| {
            let end = balanced_end(text, start)?;
            let candidate = &text[start..end];
            serde_json::from_str::<Value>(candidate)
                .is_ok()
                .then_some(candidate)
        })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFact {
    Text(String),
    Full(FactCandidate),
}

impl From<RawFact> for FactCandidate {
    fn from(raw: RawFact) -> Self {
        match raw {
            RawFact::Text(content) => FactCandidate::new(content),
            RawFact::Full(candidate) => candidate,
        }
    }
}

#[derive(Deserialize)]
struct RawConsolidation {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    facts: Vec<RawFact>,
}

/// Parse summarizer output into a [`Consolidation`].
///
/// Accepts an object with `summary` and `facts`, or a bare array taken as
/// the fact list. Fails when no payload is found or it carries nothing.
pub fn parse_consolidation(text: &str) -> Result<Consolidation, SummarizerError> {
    let payload = find_structured_payload(text)
        .ok_or_else(|| SummarizerError::ParseError("no JSON payload in output".to_string()))?;

    let raw: RawConsolidation = if payload.starts_with('[') {
        let facts: Vec<RawFact> = serde_json::from_str(payload)
            .map_err(|e| SummarizerError::ParseError(format!("invalid fact list: {e}")))?;
        RawConsolidation {
            summary: String::new(),
            facts,
        }
    } else {
        serde_json::from_str(payload)
            .map_err(|e| SummarizerError::ParseError(format!("invalid consolidation: {e}")))?
    };

    let facts: Vec<FactCandidate> = raw
        .facts
        .into_iter()
        .map(FactCandidate::from)
        .filter(|f| !f.content.trim().is_empty())
        .collect();

    let mut summary = raw.summary.trim().to_string();
    if summary.is_empty() {
        summary = facts
            .iter()
            .map(|f| f.content.trim())
            .collect::<Vec<_>>()
            .join("; ");
    }
    if summary.is_empty() {
        return Err(SummarizerError::ParseError(
            "consolidation has neither summary nor facts".to_string(),
        ));
    }

    Ok(Consolidation { summary, facts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_in_prose() {
        let text = r#"Sure! Here you go: {"summary": "s", "facts": []} Hope that helps."#;
        assert_eq!(
            find_structured_payload(text),
            Some(r#"{"summary": "s", "facts": []}"#)
        );
    }

    #[test]
    fn test_payload_in_code_fence() {
        let text = "```json\n[\"likes tea\"]\n```";
        assert_eq!(find_structured_payload(text), Some("[\"likes tea\"]"));
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let text = r#"{"summary": "user typed ] and } here", "facts": ["uses [brackets]"]} trailing ]"#;
        assert_eq!(
            find_structured_payload(text),
            Some(r#"{"summary": "user typed ] and } here", "facts": ["uses [brackets]"]}"#)
        );
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let text = r#"{"summary": "said \"hi]\" loudly"}"#;
        assert_eq!(find_structured_payload(text), Some(text));
    }

    #[test]
    fn test_skips_invalid_leading_group() {
        // "[note]" is balanced but not JSON; the real payload follows
        let text = r#"[note] {"summary": "ok"}"#;
        assert_eq!(find_structured_payload(text), Some(r#"{"summary": "ok"}"#));
    }

    #[test]
    fn test_first_to_last_bracket_would_be_wrong() {
        let text = r#"["a"] and later ["b"]"#;
        assert_eq!(find_structured_payload(text), Some(r#"["a"]"#));
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(find_structured_payload(r#"{"summary": "cut off"#), None);
        assert_eq!(find_structured_payload("no json here"), None);
        assert_eq!(find_structured_payload("{]"), None);
    }

    #[test]
    fn test_parse_object() {
        let text = r#"{"summary": "Talked about drinks.", "facts": ["likes tea", {"content": "lives in Oslo", "user_id": "u1"}]}"#;
        let parsed = parse_consolidation(text).unwrap();

        assert_eq!(parsed.summary, "Talked about drinks.");
        assert_eq!(parsed.facts.len(), 2);
        assert_eq!(parsed.facts[0], FactCandidate::new("likes tea"));
        assert_eq!(parsed.facts[1].user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_parse_bare_array_synthesizes_summary() {
        let parsed = parse_consolidation(r#"["likes tea", "owns a cat"]"#).unwrap();
        assert_eq!(parsed.summary, "likes tea; owns a cat");
        assert_eq!(parsed.facts.len(), 2);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_consolidation("[]").is_err());
        assert!(parse_consolidation(r#"{"summary": "  "}"#).is_err());
        assert!(parse_consolidation("I could not summarize this.").is_err());
    }

    #[test]
    fn test_parse_drops_blank_facts() {
        let parsed = parse_consolidation(r#"{"summary": "s", "facts": ["", "  ", "x"]}"#).unwrap();
        assert_eq!(parsed.facts, vec![FactCandidate::new("x")]);
    }
}
