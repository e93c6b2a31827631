//! Memory types for the Recall system
//!
//! Defines the identity tuple attached to memories and facts, the records
//! stored in the vector index, and the conversational turns supplied by
//! the driver.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The identity tuple a memory or fact is attached to.
///
/// Every component is optional; the all-empty scope is the global scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Guild (server / workspace) identifier
    pub guild_id: Option<String>,
    /// Channel identifier; identifies the conversation
    pub channel_id: Option<String>,
    /// User identifier
    pub user_id: Option<String>,
}

impl Scope {
    /// The global scope (no identifiers)
    pub fn global() -> Self {
        Self::default()
    }

    /// A scope for a channel inside a guild
    pub fn channel(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id.into()),
            channel_id: Some(channel_id.into()),
            user_id: None,
        }
    }

    /// A guild-wide scope
    pub fn guild(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id.into()),
            ..Self::default()
        }
    }

    /// A scope for a single user outside any guild
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Narrow this scope to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// True when no identifier is set
    pub fn is_global(&self) -> bool {
        self.guild_id.is_none() && self.channel_id.is_none() && self.user_id.is_none()
    }

    /// Lookup chain from most to least specific.
    ///
    /// exact → guild+channel → guild → global, without repeats.
    pub fn tiers(&self) -> Vec<Scope> {
        let candidates = [
            self.clone(),
            Scope {
                guild_id: self.guild_id.clone(),
                channel_id: self.channel_id.clone(),
                user_id: None,
            },
            Scope {
                guild_id: self.guild_id.clone(),
                channel_id: None,
                user_id: None,
            },
            Scope::global(),
        ];

        let mut tiers: Vec<Scope> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !tiers.contains(&candidate) {
                tiers.push(candidate);
            }
        }
        tiers
    }

    /// The scope shared by every turn of this scope's conversation.
    ///
    /// The user is dropped unless the conversation is a direct one with no
    /// guild or channel.
    pub fn conversation_scope(&self) -> Scope {
        if self.guild_id.is_none() && self.channel_id.is_none() {
            self.clone()
        } else {
            Scope {
                guild_id: self.guild_id.clone(),
                channel_id: self.channel_id.clone(),
                user_id: None,
            }
        }
    }

    /// Key of the conversation this scope belongs to.
    ///
    /// Each component of the conversation scope is written as `-` when
    /// absent or `=` plus the escaped value when present, so distinct
    /// conversations never share a key.
    pub fn conversation_key(&self) -> ConversationKey {
        let scope = self.conversation_scope();
        let key = [&scope.guild_id, &scope.channel_id, &scope.user_id]
            .into_iter()
            .map(|component| match component {
                Some(value) => format!("={}", escape_key_component(value)),
                None => "-".to_string(),
            })
            .collect::<Vec<_>>()
            .join("/");
        ConversationKey(key)
    }
}

fn escape_key_component(value: &str) -> String {
    value.replace('%', "%25").replace('/', "%2F")
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guild={} channel={} user={}",
            self.guild_id.as_deref().unwrap_or("-"),
            self.channel_id.as_deref().unwrap_or("-"),
            self.user_id.as_deref().unwrap_or("-")
        )
    }
}

/// Identifies one conversation for locking, windows and checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Scope> for ConversationKey {
    fn from(scope: &Scope) -> Self {
        scope.conversation_key()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a record in the vector index; monotonic and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a record in the index represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A raw conversational turn
    Turn,
    /// A consolidation summary replacing a window of turns
    Summary,
}

/// A record stored in the vector index. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier within the index
    pub id: MemoryId,
    /// Vector embedding, dimensionality fixed per index
    pub embedding: Vec<f32>,
    /// Text snippet
    pub text: String,
    /// Where this record belongs
    pub scope: Scope,
    /// Raw turn or summary
    pub kind: RecordKind,
    /// Who said it, for turns
    pub speaker: Option<String>,
    /// When the underlying content was produced
    pub created_at: DateTime<Utc>,
    /// Optional heuristic importance score
    pub importance: Option<f32>,
    /// Hash of the consolidated window, for summaries
    pub content_hash: Option<String>,
}

impl MemoryRecord {
    /// Rebuild the turn this record was created from
    pub fn to_turn(&self) -> Turn {
        Turn {
            speaker: self.speaker.clone().unwrap_or_default(),
            text: self.text.clone(),
            timestamp: self.created_at,
            scope: self.scope.clone(),
        }
    }
}

/// Everything needed to add a record; the index assigns the id.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub embedding: Vec<f32>,
    pub text: String,
    pub scope: Scope,
    pub kind: RecordKind,
    pub speaker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub importance: Option<f32>,
    pub content_hash: Option<String>,
}

impl MemoryDraft {
    /// Draft for a raw turn
    pub fn turn(turn: &Turn, embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            text: turn.text.clone(),
            scope: turn.scope.clone(),
            kind: RecordKind::Turn,
            speaker: Some(turn.speaker.clone()),
            created_at: turn.timestamp,
            importance: None,
            content_hash: None,
        }
    }

    /// Draft for a consolidation summary
    pub fn summary(
        scope: Scope,
        text: String,
        embedding: Vec<f32>,
        content_hash: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            embedding,
            text,
            scope,
            kind: RecordKind::Summary,
            speaker: None,
            created_at,
            importance: Some(1.0),
            content_hash: Some(content_hash),
        }
    }

    /// Draft re-creating a stored record under a new id
    pub fn from_record(record: &MemoryRecord) -> Self {
        Self {
            embedding: record.embedding.clone(),
            text: record.text.clone(),
            scope: record.scope.clone(),
            kind: record.kind,
            speaker: record.speaker.clone(),
            created_at: record.created_at,
            importance: record.importance,
            content_hash: record.content_hash.clone(),
        }
    }

    /// Set the importance score, clamped to 0.0..=1.0
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }

    pub(crate) fn into_record(self, id: MemoryId) -> MemoryRecord {
        MemoryRecord {
            id,
            embedding: self.embedding,
            text: self.text,
            scope: self.scope,
            kind: self.kind,
            speaker: self.speaker,
            created_at: self.created_at,
            importance: self.importance,
            content_hash: self.content_hash,
        }
    }
}

/// A single conversational turn supplied by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn
    pub speaker: String,
    /// Content of the message
    pub text: String,
    /// When the turn happened
    pub timestamp: DateTime<Utc>,
    /// Where the turn happened
    pub scope: Scope,
}

impl Turn {
    /// Create a new turn with the current timestamp
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, scope: Scope) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: Utc::now(),
            scope,
        }
    }

    /// Set an explicit timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_tiers_full() {
        let scope = Scope::channel("g1", "c1").with_user("u1");
        let tiers = scope.tiers();

        assert_eq!(tiers.len(), 4);
        assert_eq!(tiers[0], scope);
        assert_eq!(tiers[1], Scope::channel("g1", "c1"));
        assert_eq!(tiers[2], Scope::guild("g1"));
        assert_eq!(tiers[3], Scope::global());
    }

    #[test]
    fn test_scope_tiers_deduplicate() {
        assert_eq!(Scope::global().tiers(), vec![Scope::global()]);
        assert_eq!(
            Scope::guild("g1").tiers(),
            vec![Scope::guild("g1"), Scope::global()]
        );
        assert_eq!(
            Scope::user("u1").tiers(),
            vec![Scope::user("u1"), Scope::global()]
        );
    }

    #[test]
    fn test_conversation_key() {
        assert_eq!(Scope::channel("g1", "c1").conversation_key().as_str(), "=g1/=c1/-");
        assert_eq!(
            Scope::channel("g1", "c1").with_user("u9").conversation_key(),
            Scope::channel("g1", "c1").conversation_key()
        );
        assert_eq!(Scope::guild("g1").conversation_key().as_str(), "=g1/-/-");
        assert_eq!(Scope::user("u1").conversation_key().as_str(), "-/-/=u1");
        assert_eq!(Scope::global().conversation_key().as_str(), "-/-/-");
    }

    #[test]
    fn test_conversation_keys_do_not_collide() {
        let scopes = [
            Scope::channel("user", "u1"),
            Scope::user("u1"),
            Scope::channel("-", "c"),
            Scope {
                guild_id: None,
                channel_id: Some("c".to_string()),
                user_id: None,
            },
            Scope::guild("-"),
            Scope::global(),
            Scope::channel("a/b", "c"),
            Scope::channel("a", "b/c"),
            Scope::channel("a%2Fb", "c"),
        ];

        let keys: std::collections::HashSet<ConversationKey> =
            scopes.iter().map(Scope::conversation_key).collect();
        assert_eq!(keys.len(), scopes.len());
    }

    #[test]
    fn test_conversation_scope() {
        assert_eq!(
            Scope::channel("g1", "c1").with_user("u1").conversation_scope(),
            Scope::channel("g1", "c1")
        );
        assert_eq!(Scope::user("u1").conversation_scope(), Scope::user("u1"));
    }

    #[test]
    fn test_record_roundtrips_turn() {
        let turn = Turn::new("alice", "hello there", Scope::channel("g", "c"));
        let record = MemoryDraft::turn(&turn, vec![0.1, 0.2]).into_record(MemoryId(7));

        assert_eq!(record.id, MemoryId(7));
        assert_eq!(record.kind, RecordKind::Turn);
        assert_eq!(record.to_turn(), turn);
    }

    #[test]
    fn test_draft_importance_clamped() {
        let turn = Turn::new("bob", "x", Scope::global());
        let draft = MemoryDraft::turn(&turn, vec![]).with_importance(3.0);
        assert_eq!(draft.importance, Some(1.0));
    }
}
