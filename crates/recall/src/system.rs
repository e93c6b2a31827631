//! The memory system context object
//!
//! Owns every component and the injected dependencies. Hosts create one per
//! store and share it behind an `Arc`; there is no global state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::concurrency::LockManager;
use crate::config::Config;
use crate::consolidation::{
    CheckpointStore, ConsolidationPipeline, ConsolidationReport, ConversationCheckpoint,
    Summarizer,
};
use crate::embedding::Embedder;
use crate::error::{RecallError, Result};
use crate::facts::{FactId, FactRecord, FactStore};
use crate::index::VectorIndex;
use crate::memory::filter::ScopeFilter;
use crate::memory::types::{ConversationKey, MemoryDraft, MemoryId, Scope, Turn};
use crate::retrieval::{RankedMemory, RetrievalRanker};

const TURN_OWNER: &str = "record_turn";

/// What a query recalls: ranked memories plus the facts visible from its scope
#[derive(Debug, Clone)]
pub struct RecallContext {
    pub memories: Vec<RankedMemory>,
    pub facts: Vec<FactRecord>,
}

impl RecallContext {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.facts.is_empty()
    }
}

#[derive(Default)]
struct Background {
    monitor: Option<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

/// Long-term memory for one agent
pub struct MemorySystem {
    config: Config,
    index: VectorIndex,
    ranker: RetrievalRanker,
    facts: Arc<FactStore>,
    checkpoints: Arc<CheckpointStore>,
    locks: Arc<LockManager>,
    pipeline: Arc<ConsolidationPipeline>,
    embedder: Arc<dyn Embedder>,
    stop: watch::Sender<bool>,
    background: Mutex<Background>,
}

impl MemorySystem {
    /// Open the store described by `config` using the system clock
    pub fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        Self::with_clock(config, embedder, summarizer, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.index.dimension {
            return Err(RecallError::Config(format!(
                "embedder produces {}-dimensional vectors but index.dimension is {}",
                embedder.dimension(),
                config.index.dimension
            )));
        }
        if config.storage.persist {
            std::fs::create_dir_all(&config.storage.data_dir)?;
        }

        let index = VectorIndex::open(&config.storage, &config.index);
        let facts = Arc::new(FactStore::open(
            &config.storage,
            &config.facts,
            &config.cache,
            clock.clone(),
        ));
        let checkpoints = Arc::new(CheckpointStore::open(
            &config.storage,
            config.consolidation.checkpoints_per_conversation,
        ));
        let locks = Arc::new(LockManager::new(config.locks.clone()));
        let ranker = RetrievalRanker::new(
            index.clone(),
            config.retrieval.clone(),
            &config.cache,
            clock.clone(),
        );
        let pipeline = Arc::new(ConsolidationPipeline::new(
            index.clone(),
            facts.clone(),
            checkpoints.clone(),
            locks.clone(),
            embedder.clone(),
            summarizer,
            config.consolidation.clone(),
            clock,
        ));

        info!(
            "Memory system opened ({} records, dimension {}, persist: {})",
            index.len(),
            index.dimension(),
            config.storage.persist
        );

        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            index,
            ranker,
            facts,
            checkpoints,
            locks,
            pipeline,
            embedder,
            stop,
            background: Mutex::new(Background::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn pipeline(&self) -> &Arc<ConsolidationPipeline> {
        &self.pipeline
    }

    /// Embed and store one conversational turn
    pub async fn record_turn(&self, turn: Turn) -> Result<MemoryId> {
        if turn.text.trim().is_empty() {
            return Err(RecallError::InvalidInput("turn text is empty".to_string()));
        }

        let embedding = self.embedder.embed(&turn.text).await?;
        let key = turn.scope.conversation_key();
        let _guard = self.locks.acquire(&key, TURN_OWNER).await?;
        let id = self.index.add(MemoryDraft::turn(&turn, embedding)).await?;
        debug!("Recorded turn {} in '{}'", id, key);
        Ok(id)
    }

    /// Memories of the conversation of `scope` ranked against `query_text`,
    /// plus facts from its scope tiers sharing a keyword with the query
    pub async fn recall(&self, scope: &Scope, query_text: &str, k: usize) -> Result<RecallContext> {
        let query_vector = self.embedder.embed(query_text).await?;
        let memories =
            self.ranker
                .hybrid_search(&query_vector, query_text, k, &ScopeFilter::conversation(scope))?;
        let facts = self.facts.get_facts(scope, Some(query_text)).await;
        Ok(RecallContext { memories, facts })
    }

    pub async fn remember_fact(&self, scope: &Scope, content: &str) -> Result<FactId> {
        self.facts.add_fact(scope, content).await
    }

    pub async fn forget_fact(&self, scope: &Scope, content: &str) -> Result<usize> {
        self.facts.delete_fact(scope, content).await
    }

    /// Facts visible from `scope`, optionally narrowed by keyword
    pub async fn facts(&self, scope: &Scope, query: Option<&str>) -> Vec<FactRecord> {
        self.facts.get_facts(scope, query).await
    }

    /// Consolidate the conversation of `scope` now, even if it is not due
    pub async fn consolidate(&self, scope: &Scope) -> Result<ConsolidationReport> {
        self.pipeline.consolidate(scope, true).await
    }

    pub async fn consolidate_due(&self) -> Vec<ConsolidationReport> {
        self.pipeline.consolidate_due().await
    }

    pub async fn checkpoints(&self, key: &ConversationKey) -> Vec<ConversationCheckpoint> {
        self.checkpoints.list(key).await
    }

    pub async fn restore_checkpoint(
        &self,
        key: &ConversationKey,
        checkpoint_id: Uuid,
    ) -> Result<Vec<MemoryId>> {
        self.pipeline.restore(key, checkpoint_id).await
    }

    /// Start the lock monitor and, when enabled, the consolidation schedule
    pub fn spawn_background(&self) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.monitor.is_some() {
            debug!("Background tasks already running");
            return;
        }

        background.monitor = Some(self.locks.spawn_monitor());

        if self.config.consolidation.enabled {
            let pipeline = Arc::clone(&self.pipeline);
            let mut stop = self.stop.subscribe();
            let period = Duration::from_secs(self.config.consolidation.interval_secs.max(1));

            background.scheduler = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.changed() => break,
                    }
                    let reports = pipeline.consolidate_due().await;
                    let committed = reports.iter().filter(|r| r.is_committed()).count();
                    if committed > 0 {
                        info!("Scheduled consolidation committed {} windows", committed);
                    }
                }
                debug!("Consolidation schedule stopped");
            }));
        }

        info!("Background tasks started");
    }

    /// Stop background tasks, wait for in-flight consolidation, flush the index
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.send_replace(true);

        let (monitor, scheduler) = {
            let mut background = self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (background.monitor.take(), background.scheduler.take())
        };

        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.await {
                warn!("Consolidation schedule ended abnormally: {}", e);
            }
        }
        if let Some(monitor) = monitor {
            monitor.abort();
            let _ = monitor.await;
        }

        self.index.shutdown().await?;
        info!("Memory system shut down");
        Ok(())
    }
}
