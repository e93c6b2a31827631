//! Fact records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::types::Scope;

/// Identifier of a stored fact
pub type FactId = Uuid;

/// A durable statement extracted from conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub id: FactId,
    pub scope: Scope,
    /// Normalized statement text
    pub content: String,
    /// How many times the statement was asserted, including the first
    pub mention_count: u32,
    /// Grows with repeated mentions, in 0.0..=1.0
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    /// False once the fact has been superseded
    #[serde(default = "default_active")]
    pub active: bool,
    /// Content hash of the conversation window this fact came from
    #[serde(default)]
    pub source_hash: Option<String>,
}

fn default_active() -> bool {
    true
}

impl FactRecord {
    /// A first mention of `content` in `scope`
    pub fn new(scope: Scope, content: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            content,
            mention_count: 1,
            confidence: confidence_for(1),
            created_at: now,
            last_confirmed_at: now,
            active: true,
            source_hash: None,
        }
    }

    /// Record another mention of this fact
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.mention_count = self.mention_count.saturating_add(1);
        self.confidence = confidence_for(self.mention_count);
        if now > self.last_confirmed_at {
            self.last_confirmed_at = now;
        }
    }
}

/// `1 - 0.5^mentions`, so one mention gives 0.5 and each repeat halves the gap to 1.0
pub fn confidence_for(mentions: u32) -> f32 {
    let mentions = i32::try_from(mentions).unwrap_or(i32::MAX);
    (1.0 - 0.5f32.powi(mentions)).clamp(0.0, 1.0)
}
