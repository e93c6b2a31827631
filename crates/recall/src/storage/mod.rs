//! Durable file primitives
//!
//! Every durable file Recall owns is replaced with write-to-temp, fsync,
//! rename. A crash at any point leaves either the previous file or the new
//! one at the canonical path, never a partial write.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RecallError, Result};

/// Atomically replace `path` with `bytes`.
pub fn write_atomic_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RecallError::Storage(format!("Invalid path: {}", path.display())))?;
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        let mut temp = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        temp.write_all(bytes)?;
        temp.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(RecallError::Storage(format!(
            "Failed to write {}: {e}",
            path.display()
        )));
    }

    sync_dir(dir);
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Async wrapper running [`write_atomic_sync`] on the blocking pool.
pub async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_atomic_sync(&path, &bytes))
        .await
        .map_err(|e| RecallError::Storage(format!("Write task failed: {e}")))?
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub async fn write_json<T: Serialize>(path: PathBuf, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, bytes).await
}

/// Load a JSON document, treating a missing or unreadable file as empty.
///
/// Corruption is reported as a warning, never as an error.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No {what} file at {}, starting empty", path.display());
            return T::default();
        }
        Err(e) => {
            warn!("Failed to read {what} file {}: {e}; starting empty", path.display());
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!("Corrupt {what} file {}: {e}; starting empty", path.display());
            T::default()
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");

        write_atomic_sync(&path, b"first").unwrap();
        write_atomic_sync(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");

        write_atomic_sync(&path, b"payload").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "state.bin");
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("facts.json");

        write_atomic_sync(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_json_missing_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let value: Vec<String> = read_json_or_default(&dir.path().join("nope.json"), "test");
        assert!(value.is_empty());
    }

    #[test]
    fn test_read_json_corrupt_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not json").unwrap();

        let value: Vec<String> = read_json_or_default(&path, "test");
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_write_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");

        write_json(path.clone(), &vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let value: Vec<String> = read_json_or_default(&path, "test");
        assert_eq!(value, vec!["a", "b"]);
    }
}
