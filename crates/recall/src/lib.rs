//! Recall - Long-term memory for conversational agents
//!
//! This crate stores conversational turns as embeddings, ranks them against
//! queries with a hybrid similarity/keyword/recency score, keeps durable
//! scoped facts and periodically consolidates raw history into summaries.
//! The embedding and summarization models are injected by the host.

pub mod clock;
pub mod concurrency;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod facts;
pub mod index;
pub mod logging;
pub mod memory;
pub mod retrieval;
pub mod storage;
pub mod system;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use embedding::{Embedder, EmbeddingError};
pub use error::{RecallError, Result};
pub use memory::{ConversationKey, MemoryId, MemoryRecord, Scope, ScopeFilter, Turn};
pub use system::{MemorySystem, RecallContext};
