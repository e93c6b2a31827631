//! Near-duplicate detection for facts
//!
//! Short statements are compared by whole-word containment, longer ones by
//! token-set Jaccard similarity.

use std::collections::HashSet;

/// Trim and collapse internal whitespace
pub fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased alphanumeric words in order
pub fn words(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True when `needle` occurs in `haystack` as a contiguous run of whole words
pub fn contains_words(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Jaccard similarity of the two word sets; 0.0 when both are empty
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f32 / union as f32
}

/// Dedup rule parameters
#[derive(Debug, Clone, Copy)]
pub struct DedupRule {
    /// Statements with at most this many words use containment
    pub short_words: usize,
    /// Jaccard similarity at or above which long statements are duplicates
    pub threshold: f32,
}

impl DedupRule {
    pub fn is_duplicate(&self, existing: &str, candidate: &str) -> bool {
        let existing = words(existing);
        let candidate = words(candidate);
        if existing.is_empty() || candidate.is_empty() {
            return false;
        }
        if existing == candidate {
            return true;
        }

        if existing.len() <= self.short_words || candidate.len() <= self.short_words {
            contains_words(&existing, &candidate) || contains_words(&candidate, &existing)
        } else {
            jaccard(&existing, &candidate) >= self.threshold
        }
    }
}
