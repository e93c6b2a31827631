//! Embedding dependency
//!
//! Recall never produces embeddings itself. The host injects an [`Embedder`];
//! failures surface to the caller as `EmbeddingUnavailable` and are not
//! retried here.

use async_trait::async_trait;

/// Errors reported by an embedder
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding request rejected: {0}")]
    Rejected(String),
}

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality of the vectors this embedder returns
    fn dimension(&self) -> usize;
}
