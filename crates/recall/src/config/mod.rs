use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RecallError, Result};

/// Main configuration structure for Recall
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Where durable state lives
    #[serde(default)]
    pub storage: StorageConfig,
    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Hybrid ranking configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Bounded cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Fact store configuration
    #[serde(default)]
    pub facts: FactsConfig,
    /// Consolidation pipeline configuration
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Per-conversation lock configuration
    #[serde(default)]
    pub locks: LockConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecallError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| RecallError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Look for a config file in the usual places, falling back to defaults
    pub fn discover() -> Result<Self> {
        let default_paths = [
            dirs::home_dir().map(|h| h.join(".recall").join("config.toml")),
            dirs::config_dir().map(|c| c.join("recall").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Reject combinations of values that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.index.dimension == 0 {
            return Err(RecallError::Config(
                "index.dimension must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.decay_half_life_hours <= 0.0 {
            return Err(RecallError::Config(
                "retrieval.decay_half_life_hours must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.decay_floor) {
            return Err(RecallError::Config(
                "retrieval.decay_floor must be within 0.0..=1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.facts.dedup_similarity_threshold) {
            return Err(RecallError::Config(
                "facts.dedup_similarity_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.cache.max_cache_batch == 0 || self.cache.max_cache_entries == 0 {
            return Err(RecallError::Config(
                "cache bounds must be greater than zero".to_string(),
            ));
        }
        if self.locks.lock_force_release_timeout_s <= self.locks.lock_warn_timeout_s {
            return Err(RecallError::Config(format!(
                "locks.lock_force_release_timeout_s ({}) must exceed locks.lock_warn_timeout_s ({})",
                self.locks.lock_force_release_timeout_s, self.locks.lock_warn_timeout_s
            )));
        }
        if self.consolidation.checkpoints_per_conversation == 0 {
            return Err(RecallError::Config(
                "consolidation.checkpoints_per_conversation must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durable storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the index, fact and checkpoint files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// When false everything stays in memory and nothing touches disk
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: default_persist(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `data_dir`
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            persist: true,
        }
    }

    /// Storage that never touches disk
    pub fn in_memory() -> Self {
        Self {
            data_dir: PathBuf::new(),
            persist: false,
        }
    }

    /// Path of a file inside the data directory, or `None` when not persisting
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        self.persist.then(|| self.data_dir.join(name))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".recall"))
        .unwrap_or_else(|| PathBuf::from(".recall"))
}

fn default_persist() -> bool {
    true
}

/// Vector index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Embedding dimensionality shared by every record in the index
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Quiet period before a batch of adds is written to disk
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            persist_debounce_ms: default_persist_debounce_ms(),
        }
    }
}

fn default_dimension() -> usize {
    384
}

fn default_persist_debounce_ms() -> u64 {
    2000
}

/// Hybrid ranking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum composite score a record needs to be returned
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Weight of cosine similarity in the composite score
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,
    /// Weight of query keyword overlap in the composite score
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    /// Weight of recency decay in the composite score
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    /// Age in hours over which recency decays by a factor of e
    #[serde(default = "default_decay_half_life_hours")]
    pub decay_half_life_hours: f32,
    /// Lower bound for the recency decay
    #[serde(default = "default_decay_floor")]
    pub decay_floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            similarity_weight: default_similarity_weight(),
            keyword_weight: default_keyword_weight(),
            recency_weight: default_recency_weight(),
            decay_half_life_hours: default_decay_half_life_hours(),
            decay_floor: default_decay_floor(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_similarity_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.2
}

fn default_recency_weight() -> f32 {
    0.1
}

fn default_decay_half_life_hours() -> f32 {
    72.0
}

fn default_decay_floor() -> f32 {
    0.05
}

/// Bounds for the in-memory caches
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of candidate records loaded for one hybrid search
    #[serde(default = "default_max_cache_batch")]
    pub max_cache_batch: usize,
    /// Maximum number of entries held by each bounded cache
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_batch: default_max_cache_batch(),
            max_cache_entries: default_max_cache_entries(),
        }
    }
}

fn default_max_cache_batch() -> usize {
    2000
}

fn default_max_cache_entries() -> usize {
    256
}

/// Fact store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FactsConfig {
    /// Token-overlap similarity at or above which two long facts are duplicates
    #[serde(default = "default_dedup_similarity_threshold")]
    pub dedup_similarity_threshold: f32,
    /// Facts with at most this many words are deduplicated by containment
    #[serde(default = "default_short_fact_words")]
    pub short_fact_words: usize,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            dedup_similarity_threshold: default_dedup_similarity_threshold(),
            short_fact_words: default_short_fact_words(),
        }
    }
}

fn default_dedup_similarity_threshold() -> f32 {
    0.8
}

fn default_short_fact_words() -> usize {
    4
}

/// Consolidation pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Run the scheduled consolidation sweep
    #[serde(default = "default_consolidation_enabled")]
    pub enabled: bool,
    /// Raw turn count above which a conversation is due for consolidation
    #[serde(default = "default_window_turns")]
    pub window_turns: usize,
    /// Newest raw turns left untouched by a consolidation
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    /// Checkpoints retained per conversation (oldest evicted first)
    #[serde(default = "default_checkpoints_per_conversation")]
    pub checkpoints_per_conversation: usize,
    /// Seconds between scheduled consolidation sweeps
    #[serde(default = "default_consolidation_interval_secs")]
    pub interval_secs: u64,
    /// Conversations whose last consolidation state is remembered
    #[serde(default = "default_max_tracked_windows")]
    pub max_tracked_windows: usize,
    /// Remote summarizer configuration
    #[serde(default)]
    pub remote: RemoteSummarizerConfig,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_consolidation_enabled(),
            window_turns: default_window_turns(),
            keep_recent_turns: default_keep_recent_turns(),
            checkpoints_per_conversation: default_checkpoints_per_conversation(),
            interval_secs: default_consolidation_interval_secs(),
            max_tracked_windows: default_max_tracked_windows(),
            remote: RemoteSummarizerConfig::default(),
        }
    }
}

fn default_consolidation_enabled() -> bool {
    true
}

fn default_max_tracked_windows() -> usize {
    10_000
}

fn default_window_turns() -> usize {
    40
}

fn default_keep_recent_turns() -> usize {
    10
}

fn default_checkpoints_per_conversation() -> usize {
    5
}

fn default_consolidation_interval_secs() -> u64 {
    600
}

/// Remote API configuration for the summarizer
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSummarizerConfig {
    /// API endpoint URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_remote_api_key_env")]
    pub api_key_env: String,
    /// Model identifier for remote API
    #[serde(default = "default_remote_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteSummarizerConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_remote_api_key_env(),
            model: default_remote_model(),
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

fn default_remote_api_key_env() -> String {
    "RECALL_SUMMARIZER_API_KEY".to_string()
}

fn default_remote_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

/// Per-conversation lock configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Seconds a lock may be held before it is logged as suspicious
    #[serde(default = "default_lock_warn_timeout_s")]
    pub lock_warn_timeout_s: u64,
    /// Seconds a lock may be held before it is force-released
    #[serde(default = "default_lock_force_release_timeout_s")]
    pub lock_force_release_timeout_s: u64,
    /// Milliseconds an acquirer waits before giving up with a retryable error
    #[serde(default = "default_lock_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum number of lock entries kept for idle conversations
    #[serde(default = "default_max_lock_entries")]
    pub max_lock_entries: usize,
    /// Seconds between stale-lock sweeps
    #[serde(default = "default_lock_monitor_interval_s")]
    pub monitor_interval_s: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_warn_timeout_s: default_lock_warn_timeout_s(),
            lock_force_release_timeout_s: default_lock_force_release_timeout_s(),
            acquire_timeout_ms: default_lock_acquire_timeout_ms(),
            max_lock_entries: default_max_lock_entries(),
            monitor_interval_s: default_lock_monitor_interval_s(),
        }
    }
}

fn default_lock_warn_timeout_s() -> u64 {
    120
}

fn default_lock_force_release_timeout_s() -> u64 {
    600
}

fn default_lock_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_max_lock_entries() -> usize {
    10_000
}

fn default_lock_monitor_interval_s() -> u64 {
    30
}
