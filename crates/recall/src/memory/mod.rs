//! Memory types and filters
//!
//! Defines the scope tuple, index records, conversational turns and the
//! NULL-aware filters used to select them.

pub mod filter;
pub mod types;

pub use filter::{FieldMatch, ScopeFilter};
pub use types::{ConversationKey, MemoryDraft, MemoryId, MemoryRecord, RecordKind, Scope, Turn};
