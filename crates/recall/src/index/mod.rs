//! Vector index
//!
//! Owns embeddings and their metadata, answers cosine-similarity queries
//! and persists itself to a single checksummed file replaced atomically.

pub mod similarity;
pub mod snapshot;
pub mod vector;

pub use similarity::cosine_similarity;
pub use snapshot::{IndexSnapshot, SnapshotError};
pub use vector::{INDEX_FILE, LoadStatus, SearchHit, VectorIndex};
