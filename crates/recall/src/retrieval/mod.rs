//! Hybrid retrieval
//!
//! Ranks stored memories by a weighted blend of vector similarity, keyword
//! overlap with the query text and recency decay.

pub mod ranker;
pub mod scoring;

pub use ranker::{RankedMemory, RetrievalRanker};
pub use scoring::{composite, decay, keyword_overlap, tokenize};
