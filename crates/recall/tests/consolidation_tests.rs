//! Integration tests for the consolidation pipeline
//!
//! Runs consolidation end to end through the memory system with durable
//! storage: commit ordering, failure handling, idempotence, concurrent runs
//! and checkpoint restore.

use std::sync::Arc;

use chrono::{Duration, Utc};
use recall::config::StorageConfig;
use recall::consolidation::{CHECKPOINTS_FILE, SkipReason, Summarizer, WindowState};
use recall::memory::{RecordKind, ScopeFilter};
use recall::testing::{FailingSummarizer, MockEmbedder, ScriptedSummarizer};
use recall::{Config, MemorySystem, RecallError, Scope, Turn};
use tempfile::tempdir;

const DIM: usize = 8;

const OUTPUT: &str = r#"Here is the consolidation:
```json
{
  "summary": "Alice and Bob planned a hiking trip to the [north] ridge.",
  "facts": [
    "alice owns hiking boots",
    {"content": "bob is afraid of heights", "user_id": "bob"}
  ]
}
```"#;

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

fn config(storage: StorageConfig) -> Config {
    let mut config = Config::default();
    config.storage = storage;
    config.index.dimension = DIM;
    config.consolidation.window_turns = 6;
    config.consolidation.keep_recent_turns = 2;
    config
}

fn open(storage: StorageConfig, summarizer: Arc<dyn Summarizer>) -> MemorySystem {
    MemorySystem::open(config(storage), Arc::new(MockEmbedder::new(DIM)), summarizer).unwrap()
}

fn channel() -> Scope {
    Scope::channel("g", "trail")
}

async fn record_turns(system: &MemorySystem, count: usize) {
    let start = Utc::now() - Duration::hours(2);
    for i in 0..count {
        let speaker = if i % 2 == 0 { "alice" } else { "bob" };
        let turn = Turn::new(speaker, format!("trip message {i}"), channel().with_user(speaker))
            .at(start + Duration::minutes(i as i64));
        system.record_turn(turn).await.unwrap();
    }
}

fn turn_count(system: &MemorySystem) -> usize {
    system
        .index()
        .turns_where(&ScopeFilter::conversation(&channel()))
        .len()
}

fn summaries(system: &MemorySystem) -> usize {
    system
        .index()
        .records_where(
            &ScopeFilter::conversation(&channel()).with_kind(RecordKind::Summary),
            usize::MAX,
        )
        .len()
}

// =============================================================================
// Commit
// =============================================================================

#[tokio::test]
async fn test_due_conversation_is_consolidated_and_persisted() {
    let dir = tempdir().unwrap();
    let summarizer = Arc::new(ScriptedSummarizer::new(OUTPUT));
    {
        let system = open(StorageConfig::at(dir.path()), summarizer.clone());
        record_turns(&system, 8).await;

        let reports = system.consolidate_due().await;
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.is_committed());
        assert_eq!(report.window_len, 6);
        assert_eq!(report.removed, 6);
        assert_eq!(report.facts_written, 2);
        assert_eq!(summarizer.calls(), 1);

        system.shutdown().await.unwrap();
    }

    let reopened = open(StorageConfig::at(dir.path()), summarizer);
    assert_eq!(turn_count(&reopened), 2);
    assert_eq!(summaries(&reopened), 1);

    let checkpoints = reopened.checkpoints(&channel().conversation_key()).await;
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].records.len(), 6);
    assert!(dir.path().join(CHECKPOINTS_FILE).exists());

    let channel_facts = reopened.facts(&channel(), None).await;
    assert_eq!(channel_facts.len(), 1);
    assert_eq!(channel_facts[0].content, "alice owns hiking boots");

    let bob_facts = reopened.facts(&channel().with_user("bob"), None).await;
    assert!(bob_facts.iter().any(|f| f.content == "bob is afraid of heights"));
}

#[tokio::test]
async fn test_summary_is_recallable() {
    let mut config = config(StorageConfig::in_memory());
    config.retrieval.similarity_threshold = -1.0;
    let system = MemorySystem::open(
        config,
        Arc::new(MockEmbedder::new(DIM)),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    )
    .unwrap();
    record_turns(&system, 8).await;
    let report = system.consolidate(&channel()).await.unwrap();

    let context = system
        .recall(&channel(), "hiking trip north ridge", 10)
        .await
        .unwrap();
    assert!(
        context
            .memories
            .iter()
            .any(|m| Some(m.record.id) == report.summary_id)
    );
}

#[tokio::test]
async fn test_not_due_is_left_alone() {
    let summarizer = Arc::new(ScriptedSummarizer::new(OUTPUT));
    let system = open(StorageConfig::in_memory(), summarizer.clone());
    record_turns(&system, 5).await;

    assert!(system.consolidate_due().await.is_empty());
    assert_eq!(summarizer.calls(), 0);
    assert_eq!(turn_count(&system), 5);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_summarizer_failure_leaves_window_intact() {
    let system = open(
        StorageConfig::in_memory(),
        Arc::new(FailingSummarizer::new("upstream 503")),
    );
    record_turns(&system, 8).await;

    let err = system.consolidate(&channel()).await.unwrap_err();
    assert!(matches!(err, RecallError::SummarizationFailed(_)));
    assert!(err.is_retryable());

    assert_eq!(turn_count(&system), 8);
    assert_eq!(summaries(&system), 0);
    assert!(system.checkpoints(&channel().conversation_key()).await.is_empty());

    // The scheduled sweep reports nothing and keeps going
    assert!(system.consolidate_due().await.is_empty());
}

#[tokio::test]
async fn test_malformed_output_is_skipped() {
    let system = open(
        StorageConfig::in_memory(),
        Arc::new(ScriptedSummarizer::new("I'd rather not {summarize this")),
    );
    record_turns(&system, 8).await;

    let report = system.consolidate(&channel()).await.unwrap();
    assert!(matches!(
        report.state,
        WindowState::Skipped(SkipReason::MalformedOutput(_))
    ));
    assert_eq!(turn_count(&system), 8);
    assert!(system.facts(&channel(), None).await.is_empty());
}

// =============================================================================
// Idempotence and Concurrency
// =============================================================================

#[tokio::test]
async fn test_reconsolidating_restored_window_reuses_summary() {
    let system = open(
        StorageConfig::in_memory(),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    );
    record_turns(&system, 8).await;
    let key = channel().conversation_key();

    let first = system.consolidate(&channel()).await.unwrap();
    let facts_before = system.facts(&channel(), None).await;

    system
        .restore_checkpoint(&key, first.checkpoint_id.unwrap())
        .await
        .unwrap();
    assert_eq!(turn_count(&system), 8);

    let second = system.consolidate(&channel()).await.unwrap();
    assert!(second.is_committed());
    assert!(second.reused_summary);
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(summaries(&system), 1);
    assert_eq!(system.facts(&channel(), None).await, facts_before);
}

#[tokio::test]
async fn test_concurrent_consolidations_commit_once() {
    let system = Arc::new(open(
        StorageConfig::in_memory(),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    ));
    record_turns(&system, 8).await;

    let a = {
        let system = system.clone();
        tokio::spawn(async move { system.consolidate(&channel()).await })
    };
    let b = {
        let system = system.clone();
        tokio::spawn(async move { system.consolidate(&channel()).await })
    };
    let reports = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

    let committed = reports.iter().filter(|r| r.is_committed()).count();
    assert_eq!(committed, 1);
    assert_eq!(summaries(&system), 1);
    assert_eq!(turn_count(&system), 2);
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn test_restore_brings_back_raw_turns() {
    let system = open(
        StorageConfig::in_memory(),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    );
    record_turns(&system, 8).await;
    let before: Vec<String> = system
        .index()
        .turns_where(&ScopeFilter::conversation(&channel()))
        .into_iter()
        .map(|r| r.text)
        .collect();

    let report = system.consolidate(&channel()).await.unwrap();
    let restored = system
        .restore_checkpoint(&channel().conversation_key(), report.checkpoint_id.unwrap())
        .await
        .unwrap();
    assert_eq!(restored.len(), 6);

    let after: Vec<String> = system
        .index()
        .turns_where(&ScopeFilter::conversation(&channel()))
        .into_iter()
        .map(|r| r.text)
        .collect();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_checkpoints_bounded_per_conversation() {
    let mut config = config(StorageConfig::in_memory());
    config.consolidation.checkpoints_per_conversation = 2;
    let system = MemorySystem::open(
        config,
        Arc::new(MockEmbedder::new(DIM)),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    )
    .unwrap();

    for round in 0..3 {
        let start = Utc::now() - Duration::hours(10 - round);
        for i in 0..4 {
            let turn = Turn::new("alice", format!("round {round} turn {i}"), channel())
                .at(start + Duration::minutes(i));
            system.record_turn(turn).await.unwrap();
        }
        system.consolidate(&channel()).await.unwrap();
    }

    let checkpoints = system.checkpoints(&channel().conversation_key()).await;
    assert_eq!(checkpoints.len(), 2);
}

#[tokio::test]
async fn test_lookalike_conversations_keep_separate_checkpoints() {
    let system = open(
        StorageConfig::in_memory(),
        Arc::new(ScriptedSummarizer::new(OUTPUT)),
    );
    let direct = Scope::user("u1");
    let channel_named_like_user = Scope::channel("user", "u1");
    assert_ne!(direct.conversation_key(), channel_named_like_user.conversation_key());

    let start = Utc::now() - Duration::hours(3);
    for scope in [&direct, &channel_named_like_user] {
        for i in 0..8 {
            let turn = Turn::new("u1", format!("note {i}"), scope.clone())
                .at(start + Duration::minutes(i));
            system.record_turn(turn).await.unwrap();
        }
        assert!(system.consolidate(scope).await.unwrap().is_committed());
    }

    for scope in [&direct, &channel_named_like_user] {
        let checkpoints = system.checkpoints(&scope.conversation_key()).await;
        assert_eq!(checkpoints.len(), 1);
        assert!(checkpoints[0].records.iter().all(|r| r.scope == *scope));
    }
}
