//! In-memory vector index with debounced, atomic persistence
//!
//! Readers clone an `Arc` of the current state and search it without
//! locking; writers (`add`, `remove`, `persist`) serialize on one async
//! guard so a save never observes a half-applied mutation.
//!
//! Records live in fixed-size shared chunks ordered by id. A write while a
//! reader holds a snapshot copies the chunk pointers and at most the chunk
//! it touches, never the whole record set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{IndexConfig, StorageConfig};
use crate::error::{RecallError, Result};
use crate::index::similarity::cosine_similarity;
use crate::index::snapshot::{self, IndexSnapshot};
use crate::memory::filter::ScopeFilter;
use crate::memory::types::{MemoryDraft, MemoryId, MemoryRecord, RecordKind, Scope};
use crate::storage;

/// File name of the index inside the data directory
pub const INDEX_FILE: &str = "index.bin";

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: MemoryId,
    /// Cosine similarity to the query
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// How the index came to be
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    /// Nothing on disk (or persistence disabled)
    Fresh,
    /// Loaded this many records
    Loaded(usize),
    /// The file existed but was unusable; started empty
    Recovered(String),
}

/// Records per chunk
const CHUNK_LEN: usize = 1024;

/// Records in ascending id order, split into copy-on-write chunks
#[derive(Debug, Clone, Default)]
struct RecordChunks {
    chunks: Vec<Arc<Vec<MemoryRecord>>>,
    len: usize,
}

impl RecordChunks {
    fn from_records(mut records: Vec<MemoryRecord>) -> Self {
        records.sort_by_key(|r| r.id);
        let mut chunks = Self::default();
        for record in records {
            chunks.push(record);
        }
        chunks
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Append a record whose id is greater than every stored id
    fn push(&mut self, record: MemoryRecord) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_LEN => Arc::make_mut(chunk).push(record),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_LEN);
                chunk.push(record);
                self.chunks.push(Arc::new(chunk));
            }
        }
        self.len += 1;
    }

    fn iter(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    fn get(&self, id: MemoryId) -> Option<&MemoryRecord> {
        let at = self
            .chunks
            .partition_point(|chunk| chunk.last().is_some_and(|r| r.id < id));
        let chunk = self.chunks.get(at)?;
        let pos = chunk.binary_search_by_key(&id, |r| r.id).ok()?;
        chunk.get(pos)
    }

    fn last_id(&self) -> Option<MemoryId> {
        self.chunks.last().and_then(|chunk| chunk.last()).map(|r| r.id)
    }

    /// Drop records failing `keep`; only chunks that lose a record are copied.
    /// Returns how many were removed.
    fn retain(&mut self, mut keep: impl FnMut(&MemoryRecord) -> bool) -> usize {
        let before = self.len;
        for chunk in &mut self.chunks {
            if chunk.iter().all(&mut keep) {
                continue;
            }
            let kept: Vec<MemoryRecord> = chunk.iter().filter(|r| keep(*r)).cloned().collect();
            *chunk = Arc::new(kept);
        }
        self.chunks.retain(|chunk| !chunk.is_empty());
        self.len = self.chunks.iter().map(|chunk| chunk.len()).sum();
        before - self.len
    }

    fn to_vec(&self) -> Vec<MemoryRecord> {
        self.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    records: RecordChunks,
    next_id: u64,
    generation: u64,
}

impl IndexState {
    fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let records = RecordChunks::from_records(snapshot.records);
        let after_last = records.last_id().map_or(0, |id| id.0 + 1);
        Self {
            records,
            next_id: snapshot.next_id.max(after_last),
            generation: 0,
        }
    }
}

struct Shared {
    dimension: usize,
    path: Option<PathBuf>,
    debounce: Duration,
    load_status: LoadStatus,
    state: RwLock<Arc<IndexState>>,
    writer: TokioMutex<()>,
    dirty: AtomicBool,
    save_scheduled: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// Embeddings plus metadata, searchable by cosine similarity.
///
/// Cloning is cheap and shares the same underlying index.
#[derive(Clone)]
pub struct VectorIndex {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.shared.dimension)
            .field("path", &self.shared.path)
            .field("len", &self.len())
            .finish()
    }
}

impl VectorIndex {
    /// Open the index described by the configuration
    pub fn open(storage: &StorageConfig, config: &IndexConfig) -> Self {
        let debounce = Duration::from_millis(config.persist_debounce_ms);
        match storage.file(INDEX_FILE) {
            Some(path) => Self::load(&path, config.dimension, debounce),
            None => Self::in_memory(config.dimension),
        }
    }

    /// An index that never touches disk
    pub fn in_memory(dimension: usize) -> Self {
        Self::build(dimension, None, Duration::ZERO, IndexState::default(), LoadStatus::Fresh)
    }

    /// Load an index from `path`.
    ///
    /// A missing file yields a fresh index. A corrupt file, or one written for a
    /// different dimensionality, yields an empty index and a warning; it is
    /// never an error.
    pub fn load(path: &Path, dimension: usize, debounce: Duration) -> Self {
        let (state, status) = match std::fs::read(path) {
            Ok(bytes) => match snapshot::decode(&bytes) {
                Ok(snapshot) if snapshot.dimension == dimension => {
                    let count = snapshot.records.len();
                    info!("Loaded {} records from {}", count, path.display());
                    (IndexState::from_snapshot(snapshot), LoadStatus::Loaded(count))
                }
                Ok(snapshot) => {
                    let reason = format!(
                        "index dimension {} does not match configured {}",
                        snapshot.dimension, dimension
                    );
                    warn!("Ignoring index at {}: {}", path.display(), reason);
                    (IndexState::default(), LoadStatus::Recovered(reason))
                }
                Err(e) => {
                    warn!(
                        "Index file {} is corrupt ({}); starting with an empty index",
                        path.display(),
                        e
                    );
                    (IndexState::default(), LoadStatus::Recovered(e.to_string()))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {}, starting fresh", path.display());
                (IndexState::default(), LoadStatus::Fresh)
            }
            Err(e) => {
                warn!(
                    "Failed to read index {} ({}); starting with an empty index",
                    path.display(),
                    e
                );
                (IndexState::default(), LoadStatus::Recovered(e.to_string()))
            }
        };

        Self::build(dimension, Some(path.to_path_buf()), debounce, state, status)
    }

    fn build(
        dimension: usize,
        path: Option<PathBuf>,
        debounce: Duration,
        state: IndexState,
        load_status: LoadStatus,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dimension,
                path,
                debounce,
                load_status,
                state: RwLock::new(Arc::new(state)),
                writer: TokioMutex::new(()),
                dirty: AtomicBool::new(false),
                save_scheduled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                wake: Notify::new(),
                flusher: Mutex::new(None),
            }),
        }
    }

    /// Dimensionality shared by every record
    pub fn dimension(&self) -> usize {
        self.shared.dimension
    }

    /// How this index was loaded
    pub fn load_status(&self) -> &LoadStatus {
        &self.shared.load_status
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.snapshot().records.len()
    }

    /// True when the index holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter bumped on every mutation
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// True when there are changes not yet written to disk
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Arc<IndexState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut IndexState) -> T) -> T {
        let mut guard = self
            .shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let state = Arc::make_mut(&mut guard);
        let out = f(state);
        state.generation += 1;
        out
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.shared.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.shared.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Append a record and schedule a debounced save.
    ///
    /// The embedding is validated before anything is mutated.
    pub async fn add(&self, draft: MemoryDraft) -> Result<MemoryId> {
        self.check_dimension(&draft.embedding)?;
        if draft.embedding.iter().any(|v| !v.is_finite()) {
            return Err(RecallError::InvalidInput(
                "embedding contains non-finite values".to_string(),
            ));
        }

        let id = {
            let _writer = self.shared.writer.lock().await;
            let id = self.mutate(|state| {
                let id = MemoryId(state.next_id);
                state.next_id += 1;
                state.records.push(draft.into_record(id));
                id
            });
            self.shared.dirty.store(true, Ordering::SeqCst);
            id
        };

        debug!("Added memory {} to index", id);
        self.schedule_save();
        Ok(id)
    }

    /// Remove records by id. Returns how many were removed.
    pub async fn remove(&self, ids: &[MemoryId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = {
            let _writer = self.shared.writer.lock().await;
            let removed = self.mutate(|state| state.records.retain(|r| !ids.contains(&r.id)));
            if removed > 0 {
                self.shared.dirty.store(true, Ordering::SeqCst);
            }
            removed
        };

        debug!("Removed {} records from index", removed);
        if removed > 0 {
            self.schedule_save();
        }
        Ok(removed)
    }

    /// Top-`k` ids by cosine similarity; ties go to the newer record.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.snapshot();
        let mut hits: Vec<SearchHit> = state
            .records
            .iter()
            .map(|record| SearchHit {
                id: record.id,
                score: cosine_similarity(query, &record.embedding),
                created_at: record.created_at,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Fetch a record by id
    pub fn get(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.snapshot().records.get(id).cloned()
    }

    /// Newest-first records matching `filter`, at most `limit` of them
    pub fn records_where(&self, filter: &ScopeFilter, limit: usize) -> Vec<MemoryRecord> {
        let state = self.snapshot();
        let mut matching: Vec<&MemoryRecord> =
            state.records.iter().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        matching.into_iter().take(limit).cloned().collect()
    }

    /// Raw turns matching `filter`, oldest first
    pub fn turns_where(&self, filter: &ScopeFilter) -> Vec<MemoryRecord> {
        let filter = filter.clone().with_kind(RecordKind::Turn);
        let state = self.snapshot();
        let mut turns: Vec<MemoryRecord> = state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        turns.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        turns
    }

    /// Distinct conversations that still have raw turns
    pub fn conversation_scopes(&self) -> Vec<Scope> {
        let scopes: BTreeSet<Scope> = self
            .snapshot()
            .records
            .iter()
            .filter(|r| r.kind == RecordKind::Turn)
            .map(|r| r.scope.conversation_scope())
            .collect();
        scopes.into_iter().collect()
    }

    /// A summary record for the given window hash, if one was committed
    pub fn find_summary(&self, filter: &ScopeFilter, content_hash: &str) -> Option<MemoryRecord> {
        self.snapshot()
            .records
            .iter()
            .find(|r| {
                r.kind == RecordKind::Summary
                    && r.content_hash.as_deref() == Some(content_hash)
                    && filter.matches_scope(&r.scope)
            })
            .cloned()
    }

    /// Write the current state to disk immediately
    pub async fn persist(&self) -> Result<()> {
        let _writer = self.shared.writer.lock().await;
        self.persist_locked().await
    }

    /// Write pending changes, if any
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.shared.writer.lock().await;
        if self.shared.dirty.load(Ordering::SeqCst) {
            self.persist_locked().await?;
        }
        Ok(())
    }

    /// Stop background saving and write whatever is pending
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let handle = self
            .shared
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Index flush task ended abnormally: {}", e);
            }
        }

        self.flush().await
    }

    async fn persist_locked(&self) -> Result<()> {
        let Some(path) = self.shared.path.clone() else {
            self.shared.dirty.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let state = self.snapshot();
        let snapshot = IndexSnapshot {
            dimension: self.shared.dimension,
            next_id: state.next_id,
            records: state.records.to_vec(),
        };
        let bytes = tokio::task::spawn_blocking(move || snapshot::encode(&snapshot))
            .await
            .map_err(|e| RecallError::Storage(format!("Encode task failed: {e}")))??;

        storage::write_atomic(path, bytes).await?;
        self.shared.dirty.store(false, Ordering::SeqCst);
        debug!("Persisted {} records", state.records.len());
        Ok(())
    }

    fn schedule_save(&self) {
        if self.shared.path.is_none() || self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.shared.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let index = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(index.shared.debounce) => {}
                _ = index.shared.wake.notified() => {}
            }

            let _writer = index.shared.writer.lock().await;
            index.shared.save_scheduled.store(false, Ordering::SeqCst);
            if index.shared.dirty.load(Ordering::SeqCst) {
                if let Err(e) = index.persist_locked().await {
                    warn!("Debounced index save failed: {}", e);
                }
            }
        });

        *self
            .shared
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}
