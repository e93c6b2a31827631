//! Consolidation pipeline
//!
//! Compresses the older raw turns of a conversation into a summary record
//! plus durable facts. The conversation lock is held while the window is
//! read and while the result is committed, never during the summarizer
//! call; the window is re-validated before anything is written.
//!
//! Commit order: facts and summary are persisted, the window is
//! checkpointed, and only then are the raw turns removed.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::concurrency::LockManager;
use crate::config::ConsolidationConfig;
use crate::consolidation::checkpoint::{CheckpointStore, ConversationCheckpoint};
use crate::consolidation::extract::parse_consolidation;
use crate::consolidation::summarizer::{Consolidation, Summarizer};
use crate::embedding::Embedder;
use crate::error::{RecallError, Result};
use crate::facts::FactStore;
use crate::index::VectorIndex;
use crate::memory::filter::ScopeFilter;
use crate::memory::types::{ConversationKey, MemoryDraft, MemoryId, MemoryRecord, Scope, Turn};

const LOCK_OWNER: &str = "consolidation";

/// Where a conversation window is in its consolidation lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum WindowState {
    /// Waiting for consolidation
    Pending,
    /// The summarizer is working on it
    Extracting,
    /// Summary and facts durable, raw turns removed
    Committed,
    /// Left untouched
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Not enough raw turns to consolidate
    NotDue,
    /// Nothing older than the retained recent turns
    EmptyWindow,
    /// The summarizer returned an error
    SummarizerFailed(String),
    /// The summarizer output held no usable payload
    MalformedOutput(String),
    /// The window was modified while the summarizer ran
    WindowChanged,
    /// The lock was force-released before commit
    LockLost,
    /// A dependency or storage failure after extraction began
    Failed(String),
}

impl WindowState {
    /// Committed or skipped
    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowState::Committed | WindowState::Skipped(_))
    }
}

/// Outcome of one consolidation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationReport {
    pub key: ConversationKey,
    pub state: WindowState,
    /// Number of raw turns in the window
    pub window_len: usize,
    pub content_hash: Option<String>,
    pub summary_id: Option<MemoryId>,
    /// True when a summary for this exact window already existed
    pub reused_summary: bool,
    pub facts_written: usize,
    pub removed: usize,
    pub checkpoint_id: Option<Uuid>,
}

impl ConsolidationReport {
    fn skipped(key: ConversationKey, reason: SkipReason) -> Self {
        Self {
            key,
            state: WindowState::Skipped(reason),
            window_len: 0,
            content_hash: None,
            summary_id: None,
            reused_summary: false,
            facts_written: 0,
            removed: 0,
            checkpoint_id: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == WindowState::Committed
    }
}

/// Hash of a window: speaker, text and timestamp of every turn, in order
pub fn window_hash(records: &[MemoryRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.speaker.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1f]);
        hasher.update(record.text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(record.created_at.to_rfc3339().as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

pub struct ConsolidationPipeline {
    index: VectorIndex,
    facts: Arc<FactStore>,
    checkpoints: Arc<CheckpointStore>,
    locks: Arc<LockManager>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    config: ConsolidationConfig,
    states: DashMap<ConversationKey, WindowState>,
    clock: Arc<dyn Clock>,
}

impl ConsolidationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: VectorIndex,
        facts: Arc<FactStore>,
        checkpoints: Arc<CheckpointStore>,
        locks: Arc<LockManager>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        config: ConsolidationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            facts,
            checkpoints,
            locks,
            embedder,
            summarizer,
            config,
            states: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Last known state of a conversation's window
    pub fn state(&self, key: &ConversationKey) -> Option<WindowState> {
        self.states.get(key).map(|s| s.clone())
    }

    /// Number of conversations with a remembered state
    pub fn tracked_windows(&self) -> usize {
        self.states.len()
    }

    /// Record a state; past `max_tracked_windows`, finished windows of other
    /// conversations are forgotten while in-flight ones are kept.
    fn set_state(&self, key: &ConversationKey, state: WindowState) {
        debug!("Consolidation state for '{}': {:?}", key, state);
        self.states.insert(key.clone(), state);

        if self.states.len() > self.config.max_tracked_windows.max(1) {
            self.states
                .retain(|tracked, state| tracked == key || !state.is_terminal());
            debug!("Forgot finished consolidation states, {} left", self.states.len());
        }
    }

    /// True when the conversation has more raw turns than `window_turns`
    pub fn is_due(&self, scope: &Scope) -> bool {
        let turns = self
            .index
            .turns_where(&ScopeFilter::conversation(&scope.conversation_scope()));
        turns.len() > self.config.window_turns
    }

    /// Raw turns eligible for consolidation: all but the newest `keep_recent_turns`
    fn window(&self, scope: &Scope) -> (usize, Vec<MemoryRecord>) {
        let mut turns = self.index.turns_where(&ScopeFilter::conversation(scope));
        let total = turns.len();
        turns.truncate(total.saturating_sub(self.config.keep_recent_turns));
        (total, turns)
    }

    /// Consolidate one conversation.
    ///
    /// Without `force`, conversations that are not due are skipped. Summarizer
    /// errors leave the window untouched and are returned as
    /// `SummarizationFailed`; malformed output and concurrent modification are
    /// reported as skipped.
    pub async fn consolidate(&self, scope: &Scope, force: bool) -> Result<ConsolidationReport> {
        let scope = scope.conversation_scope();
        let key = scope.conversation_key();

        // Phase 1: read the window under the lock
        let (total, window) = {
            let _guard = self.locks.acquire(&key, LOCK_OWNER).await?;
            self.window(&scope)
        };

        if !force && total <= self.config.window_turns {
            return Ok(ConsolidationReport::skipped(key, SkipReason::NotDue));
        }
        if window.is_empty() {
            return Ok(ConsolidationReport::skipped(key, SkipReason::EmptyWindow));
        }

        let hash = window_hash(&window);
        let report = ConsolidationReport {
            key: key.clone(),
            state: WindowState::Pending,
            window_len: window.len(),
            content_hash: Some(hash.clone()),
            summary_id: None,
            reused_summary: false,
            facts_written: 0,
            removed: 0,
            checkpoint_id: None,
        };
        self.set_state(&key, WindowState::Pending);
        self.set_state(&key, WindowState::Extracting);

        match self.extract_and_commit(&scope, &window, report).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let reason = match &e {
                    RecallError::SummarizationFailed(message) => {
                        SkipReason::SummarizerFailed(message.clone())
                    }
                    other => SkipReason::Failed(other.to_string()),
                };
                warn!("Consolidation of '{}' abandoned: {}", key, e);
                self.set_state(&key, WindowState::Skipped(reason));
                Err(e)
            }
        }
    }

    /// Summarize without the lock, then re-validate and commit under it
    async fn extract_and_commit(
        &self,
        scope: &Scope,
        window: &[MemoryRecord],
        mut report: ConsolidationReport,
    ) -> Result<ConsolidationReport> {
        let key = report.key.clone();
        let hash = report.content_hash.clone().unwrap_or_default();

        let turns: Vec<Turn> = window.iter().map(MemoryRecord::to_turn).collect();
        let raw = self.summarizer.summarize(&turns).await.map_err(|e| {
            warn!("Summarizer '{}' failed for '{}': {}", self.summarizer.name(), key, e);
            RecallError::from(e)
        })?;

        let consolidation = match parse_consolidation(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Discarding malformed consolidation for '{}': {}", key, e);
                return Ok(self.skip(report, SkipReason::MalformedOutput(e.to_string())));
            }
        };

        let existing = self
            .index
            .find_summary(&ScopeFilter::conversation(scope), &hash);
        let summary_embedding = match existing {
            Some(_) => None,
            None => Some(self.embedder.embed(&consolidation.summary).await?),
        };

        // Re-validate and commit under the lock
        let guard = self.locks.acquire(&key, LOCK_OWNER).await?;
        if !self.window_unchanged(window, &hash) {
            info!("Window for '{}' changed during summarization, skipping", key);
            return Ok(self.skip(report, SkipReason::WindowChanged));
        }

        let newest = window
            .last()
            .map(|r| r.created_at)
            .unwrap_or_else(|| self.clock.now());

        match self
            .index
            .find_summary(&ScopeFilter::conversation(scope), &hash)
        {
            Some(summary) => {
                debug!("Window {} for '{}' already summarized as {}", hash, key, summary.id);
                report.summary_id = Some(summary.id);
                report.reused_summary = true;
            }
            None => {
                let embedding = match summary_embedding {
                    Some(embedding) => embedding,
                    None => self.embedder.embed(&consolidation.summary).await?,
                };
                if !guard.is_valid() {
                    return Ok(self.skip(report, SkipReason::LockLost));
                }
                report.facts_written = self.write_facts(scope, &consolidation, &hash).await?;
                let draft = MemoryDraft::summary(
                    scope.clone(),
                    consolidation.summary.clone(),
                    embedding,
                    hash.clone(),
                    newest,
                );
                report.summary_id = Some(self.index.add(draft).await?);
                self.index.persist().await?;
            }
        }

        if !guard.is_valid() {
            return Ok(self.skip(report, SkipReason::LockLost));
        }
        let checkpoint = ConversationCheckpoint::new(
            key.clone(),
            "consolidation",
            hash.clone(),
            window.to_vec(),
            self.clock.now(),
        );
        report.checkpoint_id = Some(self.checkpoints.save(checkpoint).await?);

        let ids: Vec<MemoryId> = window.iter().map(|r| r.id).collect();
        report.removed = self.index.remove(&ids).await?;
        self.index.persist().await?;
        drop(guard);

        info!(
            "Consolidated {} turns of '{}' into summary {:?} ({} facts)",
            report.removed, key, report.summary_id, report.facts_written
        );
        self.set_state(&key, WindowState::Committed);
        report.state = WindowState::Committed;
        Ok(report)
    }

    fn skip(&self, mut report: ConsolidationReport, reason: SkipReason) -> ConsolidationReport {
        let state = WindowState::Skipped(reason);
        self.set_state(&report.key, state.clone());
        report.state = state;
        report
    }

    /// Every record of the window is still present and unchanged
    fn window_unchanged(&self, window: &[MemoryRecord], hash: &str) -> bool {
        let current: Option<Vec<MemoryRecord>> =
            window.iter().map(|r| self.index.get(r.id)).collect();
        current.is_some_and(|records| window_hash(&records) == hash)
    }

    async fn write_facts(
        &self,
        scope: &Scope,
        consolidation: &Consolidation,
        hash: &str,
    ) -> Result<usize> {
        let mut written = 0;
        for candidate in &consolidation.facts {
            let fact_scope = match &candidate.user_id {
                Some(user) => scope.clone().with_user(user.clone()),
                None => scope.clone(),
            };
            if let Some(hint) = &candidate.supersedes {
                self.facts.supersede(&fact_scope, hint).await?;
            }
            match self
                .facts
                .add_fact_from(&fact_scope, &candidate.content, Some(hash))
                .await
            {
                Ok(_) => written += 1,
                Err(RecallError::InvalidInput(reason)) => {
                    debug!("Skipping fact candidate: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Consolidate every conversation that is due, continuing past failures
    pub async fn consolidate_due(&self) -> Vec<ConsolidationReport> {
        let mut reports = Vec::new();
        for scope in self.index.conversation_scopes() {
            if !self.is_due(&scope) {
                continue;
            }
            match self.consolidate(&scope, false).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(
                    "Consolidation of '{}' failed: {}",
                    scope.conversation_key(),
                    e
                ),
            }
        }
        reports
    }

    /// Put the raw turns of a checkpoint back into the index.
    ///
    /// Summaries and facts derived from the window are kept. Returns the ids
    /// of the re-inserted records.
    pub async fn restore(&self, key: &ConversationKey, checkpoint_id: Uuid) -> Result<Vec<MemoryId>> {
        let checkpoint = self
            .checkpoints
            .get(key, checkpoint_id)
            .await
            .ok_or_else(|| RecallError::NotFound(format!("checkpoint {checkpoint_id} for '{key}'")))?;

        let _guard = self.locks.acquire(key, LOCK_OWNER).await?;
        let mut ids = Vec::with_capacity(checkpoint.records.len());
        for record in &checkpoint.records {
            ids.push(self.index.add(MemoryDraft::from_record(record)).await?);
        }
        self.index.persist().await?;
        info!(
            "Restored {} turns of '{}' from checkpoint {}",
            ids.len(),
            key,
            checkpoint_id
        );
        self.set_state(key, WindowState::Pending);
        Ok(ids)
    }
}
