//! Integration tests for vector index persistence
//!
//! Covers the on-disk round trip, debounced saves, and recovery from
//! corrupt or mismatched index files.

use std::time::Duration;

use recall::config::{IndexConfig, StorageConfig};
use recall::index::{INDEX_FILE, LoadStatus, VectorIndex};
use recall::memory::{MemoryDraft, Scope, Turn};
use recall::testing::MockEmbedder;
use tempfile::tempdir;

const DIM: usize = 8;

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

fn draft(text: &str) -> MemoryDraft {
    let turn = Turn::new("alice", text, Scope::channel("g", "c"));
    MemoryDraft::turn(&turn, MockEmbedder::new(DIM).vector(text))
}

fn open(dir: &std::path::Path, debounce_ms: u64) -> VectorIndex {
    VectorIndex::open(
        &StorageConfig::at(dir),
        &IndexConfig {
            dimension: DIM,
            persist_debounce_ms: debounce_ms,
        },
    )
}

// =============================================================================
// Round Trip
// =============================================================================

#[tokio::test]
async fn test_persist_and_reload() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    assert_eq!(index.load_status(), &LoadStatus::Fresh);

    let texts = [
        "first memory",
        "second memory",
        "the cat sat on the mat",
        "planning a trip to the mountains",
        "rust ownership and borrowing",
        "second memory",
    ];
    let mut ids = Vec::new();
    for text in texts {
        ids.push(index.add(draft(text)).await.unwrap());
    }
    index.persist().await.unwrap();
    assert!(!index.is_dirty());

    let reloaded = open(dir.path(), 60_000);
    assert_eq!(reloaded.load_status(), &LoadStatus::Loaded(texts.len()));
    for id in &ids {
        assert_eq!(reloaded.get(*id), index.get(*id));
    }

    let embedder = MockEmbedder::new(DIM);
    let queries = ["second memory", "cat on a mat", "mountain trip", "borrow checker"];
    for query in queries {
        let vector = embedder.vector(query);
        for k in [1, 3, texts.len()] {
            assert_eq!(
                reloaded.search(&vector, k).unwrap(),
                index.search(&vector, k).unwrap(),
                "query {query:?} with k={k}"
            );
        }
    }
    assert_eq!(
        reloaded.search(&embedder.vector("second memory"), 1).unwrap()[0].id,
        ids[5]
    );
}

#[tokio::test]
async fn test_ids_not_reused_after_reload() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    let a = index.add(draft("a")).await.unwrap();
    let b = index.add(draft("b")).await.unwrap();
    index.remove(&[b]).await.unwrap();
    index.persist().await.unwrap();

    let reloaded = open(dir.path(), 60_000);
    let c = reloaded.add(draft("c")).await.unwrap();
    assert!(c > b);
    assert!(reloaded.get(a).is_some());
}

#[tokio::test]
async fn test_debounced_save_writes_after_quiet_period() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 20);

    index.add(draft("one")).await.unwrap();
    index.add(draft("two")).await.unwrap();
    assert!(index.is_dirty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!index.is_dirty());
    assert!(dir.path().join(INDEX_FILE).exists());
    assert_eq!(open(dir.path(), 20).len(), 2);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_changes() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    index.add(draft("pending")).await.unwrap();

    index.shutdown().await.unwrap();

    assert_eq!(open(dir.path(), 60_000).len(), 1);
}

#[tokio::test]
async fn test_no_temp_files_left_behind() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    for i in 0..5 {
        index.add(draft(&format!("memory {i}"))).await.unwrap();
        index.persist().await.unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![INDEX_FILE.to_string()]);
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn test_corrupt_file_recovers_empty() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    index.add(draft("will be corrupted")).await.unwrap();
    index.persist().await.unwrap();

    let path = dir.path().join(INDEX_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let recovered = open(dir.path(), 60_000);
    assert!(matches!(recovered.load_status(), LoadStatus::Recovered(_)));
    assert!(recovered.is_empty());

    // The recovered index is usable
    recovered.add(draft("fresh start")).await.unwrap();
    assert_eq!(recovered.len(), 1);
}

#[tokio::test]
async fn test_truncated_file_recovers_empty() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    index.add(draft("x")).await.unwrap();
    index.persist().await.unwrap();

    let path = dir.path().join(INDEX_FILE);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    let recovered = open(dir.path(), 60_000);
    assert!(matches!(recovered.load_status(), LoadStatus::Recovered(_)));
    assert!(recovered.is_empty());
}

#[tokio::test]
async fn test_garbage_file_recovers_empty() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(INDEX_FILE), b"not an index at all").unwrap();

    let recovered = open(dir.path(), 60_000);
    assert!(matches!(recovered.load_status(), LoadStatus::Recovered(_)));
    assert!(recovered.is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_recovers_empty() {
    let dir = tempdir().unwrap();
    let index = open(dir.path(), 60_000);
    index.add(draft("eight dims")).await.unwrap();
    index.persist().await.unwrap();

    let other = VectorIndex::open(
        &StorageConfig::at(dir.path()),
        &IndexConfig {
            dimension: DIM * 2,
            persist_debounce_ms: 60_000,
        },
    );
    assert!(matches!(other.load_status(), LoadStatus::Recovered(_)));
    assert!(other.is_empty());
}
