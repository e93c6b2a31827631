//! Durable fact store
//!
//! Facts live in one JSON document replaced atomically on every mutation.
//! Mutations are serialized by a write lock and only become visible once the
//! new document is on disk. A per-scope mirror of active facts serves
//! `get_facts` and is refreshed after every successful mutation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::concurrency::BoundedCache;
use crate::config::{CacheConfig, FactsConfig, StorageConfig};
use crate::error::{RecallError, Result};
use crate::facts::dedup::{DedupRule, contains_words, normalize, words};
use crate::facts::predicate::FactPredicate;
use crate::facts::types::{FactId, FactRecord};
use crate::memory::types::Scope;
use crate::retrieval::keyword_overlap;
use crate::storage;

/// File name of the fact store inside the data directory
pub const FACTS_FILE: &str = "facts.json";

pub struct FactStore {
    facts: RwLock<Vec<FactRecord>>,
    path: Option<PathBuf>,
    rule: DedupRule,
    /// Active facts per exact scope, most recently confirmed first
    mirror: BoundedCache<Scope, Arc<Vec<FactRecord>>>,
    clock: Arc<dyn Clock>,
}

impl FactStore {
    /// Open the store described by the configuration
    pub fn open(
        storage: &StorageConfig,
        config: &FactsConfig,
        cache: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let path = storage.file(FACTS_FILE);
        let facts: Vec<FactRecord> = match &path {
            Some(path) => storage::read_json_or_default(path, "facts"),
            None => Vec::new(),
        };
        if !facts.is_empty() {
            info!("Loaded {} facts", facts.len());
        }

        Self {
            facts: RwLock::new(facts),
            path,
            rule: DedupRule {
                short_words: config.short_fact_words,
                threshold: config.dedup_similarity_threshold,
            },
            mirror: BoundedCache::new(cache.max_cache_entries),
            clock,
        }
    }

    /// Number of stored facts, active or not
    pub async fn len(&self) -> usize {
        self.facts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.facts.read().await.is_empty()
    }

    /// Every stored fact, including superseded ones
    pub async fn all(&self) -> Vec<FactRecord> {
        self.facts.read().await.clone()
    }

    /// Store a fact, or confirm an existing near-duplicate.
    ///
    /// Returns the id of the new or confirmed fact.
    pub async fn add_fact(&self, scope: &Scope, content: &str) -> Result<FactId> {
        self.add_fact_from(scope, content, None).await
    }

    /// Like [`add_fact`](Self::add_fact), tagging new facts with the window they came from
    pub async fn add_fact_from(
        &self,
        scope: &Scope,
        content: &str,
        source_hash: Option<&str>,
    ) -> Result<FactId> {
        let content = normalize(content);
        if content.is_empty() {
            return Err(RecallError::InvalidInput(
                "fact content is empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut facts = self.facts.write().await;
        let mut next = facts.clone();

        let tiers = scope.tiers();
        let existing = tiers.iter().find_map(|tier| {
            next.iter().position(|fact| {
                fact.active && &fact.scope == tier && self.rule.is_duplicate(&fact.content, &content)
            })
        });

        let (id, touched) = match existing {
            Some(pos) => {
                let fact = &mut next[pos];
                fact.confirm(now);
                debug!(
                    "Confirmed fact {} ({} mentions): {}",
                    fact.id, fact.mention_count, fact.content
                );
                (fact.id, fact.scope.clone())
            }
            None => {
                let mut fact = FactRecord::new(scope.clone(), content, now);
                fact.source_hash = source_hash.map(str::to_string);
                debug!("Stored new fact {} in {}: {}", fact.id, scope, fact.content);
                let id = fact.id;
                next.push(fact);
                (id, scope.clone())
            }
        };

        self.commit(&mut facts, next).await?;
        self.refresh_mirror(&facts, [touched]);
        Ok(id)
    }

    /// Active facts visible from `scope`, most specific tier first.
    ///
    /// Within a tier the most recently confirmed fact comes first. With a
    /// query, only facts sharing at least one keyword with it are kept.
    pub async fn get_facts(&self, scope: &Scope, query: Option<&str>) -> Vec<FactRecord> {
        let query = query.filter(|q| !q.trim().is_empty());
        let mut out = Vec::new();
        for tier in scope.tiers() {
            let tier_facts = match self.mirror.get(&tier) {
                Some(cached) => cached,
                None => {
                    let facts = self.facts.read().await;
                    let loaded = Arc::new(active_in(&facts, &tier));
                    self.mirror.put(tier, loaded.clone());
                    loaded
                }
            };

            out.extend(
                tier_facts
                    .iter()
                    .filter(|fact| query.is_none_or(|q| keyword_overlap(q, &fact.content) > 0.0))
                    .cloned(),
            );
        }
        out
    }

    /// Remove facts in exactly `scope` whose content equals `content`.
    ///
    /// Returns how many facts were removed.
    pub async fn delete_fact(&self, scope: &Scope, content: &str) -> Result<usize> {
        let predicate = FactPredicate::new(scope, content);
        debug!("Deleting facts where {}", predicate.to_clause());

        let mut facts = self.facts.write().await;
        let next: Vec<FactRecord> = facts
            .iter()
            .filter(|fact| !predicate.matches(fact))
            .cloned()
            .collect();
        let removed = facts.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }

        self.commit(&mut facts, next).await?;
        self.refresh_mirror(&facts, [scope.clone()]);
        info!("Deleted {} facts from {}", removed, scope);
        Ok(removed)
    }

    /// Deactivate active facts in exactly `scope` containing `hint` as whole words.
    ///
    /// Returns how many facts were deactivated.
    pub async fn supersede(&self, scope: &Scope, hint: &str) -> Result<usize> {
        let hint = words(hint);
        if hint.is_empty() {
            return Ok(0);
        }

        let mut facts = self.facts.write().await;
        let mut next = facts.clone();
        let mut changed = 0;
        for fact in next.iter_mut() {
            if fact.active && &fact.scope == scope && contains_words(&words(&fact.content), &hint)
            {
                fact.active = false;
                changed += 1;
            }
        }
        if changed == 0 {
            return Ok(0);
        }

        self.commit(&mut facts, next).await?;
        self.refresh_mirror(&facts, [scope.clone()]);
        debug!("Superseded {} facts in {}", changed, scope);
        Ok(changed)
    }

    /// Persist `next` and, only once it is durable, make it the current state
    async fn commit(&self, facts: &mut Vec<FactRecord>, next: Vec<FactRecord>) -> Result<()> {
        if let Some(path) = &self.path {
            storage::write_json(path.clone(), &next).await?;
        }
        *facts = next;
        Ok(())
    }

    fn refresh_mirror(&self, facts: &[FactRecord], scopes: impl IntoIterator<Item = Scope>) {
        for scope in scopes {
            let active = Arc::new(active_in(facts, &scope));
            self.mirror.put(scope, active);
        }
    }
}

fn active_in(facts: &[FactRecord], scope: &Scope) -> Vec<FactRecord> {
    let mut active: Vec<FactRecord> = facts
        .iter()
        .filter(|fact| fact.active && &fact.scope == scope)
        .cloned()
        .collect();
    active.sort_by(|a, b| b.last_confirmed_at.cmp(&a.last_confirmed_at));
    active
}
