//! Summarization dependency
//!
//! Defines the [`Summarizer`] trait that abstracts the model used to compress
//! a window of turns, and the structured result parsed from its output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::types::Turn;

/// Errors that can occur while summarizing
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Trait for summarization backends
///
/// Implementations receive the turns of one conversation window, oldest
/// first, and return the raw model output. Recall extracts the structured
/// payload from that text itself.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a window of turns
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// A fact proposed by the summarizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCandidate {
    /// The statement itself
    pub content: String,
    /// Narrow the fact to this user within the conversation
    #[serde(default)]
    pub user_id: Option<String>,
    /// Words identifying an older fact this one replaces
    #[serde(default)]
    pub supersedes: Option<String>,
}

impl FactCandidate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            user_id: None,
            supersedes: None,
        }
    }
}

/// Structured result of summarizing one window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Consolidation {
    pub summary: String,
    pub facts: Vec<FactCandidate>,
}
