//! Consolidation of raw conversation history
//!
//! Summarizes windows of older turns into summary records and durable
//! facts, with checkpoints kept so a consolidated window can be restored.

pub mod checkpoint;
pub mod extract;
pub mod pipeline;
pub mod prompts;
pub mod remote;
pub mod summarizer;

pub use checkpoint::{CHECKPOINTS_FILE, CheckpointStore, ConversationCheckpoint};
pub use extract::{find_structured_payload, parse_consolidation};
pub use pipeline::{ConsolidationPipeline, ConsolidationReport, SkipReason, WindowState};
pub use remote::RemoteSummarizer;
pub use summarizer::{Consolidation, FactCandidate, Summarizer, SummarizerError};
