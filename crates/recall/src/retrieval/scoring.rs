//! Scoring components for hybrid retrieval
//!
//! Pure functions: recency decay, keyword overlap and the weighted
//! composite of both with cosine similarity.

use std::collections::HashSet;

use crate::config::RetrievalConfig;

/// Words too common to carry meaning in a keyword match
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "did", "do", "does", "for",
    "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "is", "it", "its",
    "me", "my", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "there",
    "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "you", "your",
];

/// Recency multiplier for a record `age_hours` old.
///
/// `max(floor, exp(-age / half_life))`, capped at 1.0. Negative ages (clock
/// skew) count as zero, so the result is always within `floor..=1.0` and is
/// non-increasing in age.
pub fn decay(age_hours: f32, half_life_hours: f32, floor: f32) -> f32 {
    // f32::max treats NaN as missing, so NaN ages also count as zero
    let age = age_hours.max(0.0);
    let half_life = half_life_hours.max(f32::EPSILON);
    (-age / half_life).exp().max(floor).min(1.0)
}

/// Lower-cased alphanumeric words, stop words removed
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Fraction of distinct query tokens that also appear in `text`.
///
/// 0.0 when the query has no meaningful tokens.
pub fn keyword_overlap(query: &str, text: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens = tokenize(text);
    let shared = query_tokens.intersection(&text_tokens).count();
    shared as f32 / query_tokens.len() as f32
}

/// Weighted sum of similarity, keyword overlap and recency
pub fn composite(config: &RetrievalConfig, similarity: f32, overlap: f32, recency: f32) -> f32 {
    config.similarity_weight * similarity
        + config.keyword_weight * overlap
        + config.recency_weight * recency
}
