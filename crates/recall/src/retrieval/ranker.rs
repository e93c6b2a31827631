//! Hybrid retrieval over the vector index
//!
//! Candidates are a bounded, newest-first batch of records matching the
//! scope filter. Each candidate is scored by cosine similarity, keyword
//! overlap and recency decay; the weighted composite is thresholded, sorted
//! and truncated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Clock;
use crate::concurrency::BoundedCache;
use crate::config::{CacheConfig, RetrievalConfig};
use crate::error::{RecallError, Result};
use crate::index::{VectorIndex, cosine_similarity};
use crate::memory::filter::ScopeFilter;
use crate::memory::types::MemoryRecord;
use crate::retrieval::scoring::{composite, decay, keyword_overlap};

/// A retrieved record with its score breakdown
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub record: MemoryRecord,
    /// Cosine similarity to the query vector
    pub similarity: f32,
    /// Fraction of query keywords found in the record text
    pub keyword_overlap: f32,
    /// Recency decay at query time
    pub recency: f32,
    /// Weighted composite used for thresholding and ordering
    pub score: f32,
}

/// A candidate batch and the index generation it was read at
type Batch = (u64, Arc<Vec<MemoryRecord>>);

/// Scores index records against a query
pub struct RetrievalRanker {
    index: VectorIndex,
    config: RetrievalConfig,
    max_batch: usize,
    batches: BoundedCache<String, Batch>,
    /// Generation the cached batches belong to
    cached_generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl RetrievalRanker {
    pub fn new(
        index: VectorIndex,
        config: RetrievalConfig,
        cache: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            config,
            max_batch: cache.max_cache_batch,
            batches: BoundedCache::new(cache.max_cache_entries),
            cached_generation: AtomicU64::new(0),
            clock,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Number of candidate batches currently cached
    pub fn cached_batches(&self) -> usize {
        self.batches.len()
    }

    /// Newest-first candidates for `filter`, at most `max_cache_batch` of them.
    ///
    /// One batch is kept per filter clause. Any index mutation empties the
    /// cache, so stale batches never accumulate.
    fn candidates(&self, filter: &ScopeFilter) -> Arc<Vec<MemoryRecord>> {
        let generation = self.index.generation();
        if self.cached_generation.swap(generation, Ordering::AcqRel) != generation {
            self.batches.clear();
        }

        let clause = filter.to_clause().unwrap_or_default();
        if let Some((cached_at, batch)) = self.batches.get(&clause) {
            if cached_at == generation {
                return batch;
            }
        }

        let batch = Arc::new(self.index.records_where(filter, self.max_batch));
        self.batches.put(clause, (generation, Arc::clone(&batch)));
        batch
    }

    /// Rank records matching `filter` against a query.
    ///
    /// Only records whose composite score reaches `similarity_threshold` are
    /// returned, best first; equal scores go to the newer record. An empty
    /// result is not an error.
    pub fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        filter: &ScopeFilter,
    ) -> Result<Vec<RankedMemory>> {
        if query_vector.len() != self.index.dimension() {
            return Err(RecallError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let candidates = self.candidates(filter);

        let mut ranked: Vec<RankedMemory> = candidates
            .iter()
            .filter_map(|record| {
                let similarity = cosine_similarity(query_vector, &record.embedding);
                let overlap = keyword_overlap(query_text, &record.text);
                let age_hours = (now - record.created_at).num_seconds() as f32 / 3600.0;
                let recency = decay(
                    age_hours,
                    self.config.decay_half_life_hours,
                    self.config.decay_floor,
                );
                let score = composite(&self.config, similarity, overlap, recency);

                (score >= self.config.similarity_threshold).then(|| RankedMemory {
                    record: record.clone(),
                    similarity,
                    keyword_overlap: overlap,
                    recency,
                    score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
                .then_with(|| b.record.id.cmp(&a.record.id))
        });
        ranked.truncate(k);

        tracing::debug!(
            "Hybrid search: {} candidates, {} above threshold {}",
            candidates.len(),
            ranked.len(),
            self.config.similarity_threshold
        );
        Ok(ranked)
    }
}
