//! On-disk format of the vector index
//!
//! ```text
//! magic (8) | format version u32 LE | payload length u64 LE | payload | sha256(payload) (32)
//! ```
//!
//! The payload is the bincode encoding of [`IndexSnapshot`].

use bincode::Options;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RecallError, Result};
use crate::memory::types::MemoryRecord;

const MAGIC: &[u8; 8] = b"RECALLIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// Everything needed to rebuild an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub dimension: usize,
    pub next_id: u64,
    pub records: Vec<MemoryRecord>,
}

/// Reasons a persisted index cannot be used
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SnapshotError {
    #[error("not an index file")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("file truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("payload decode failed: {0}")]
    Decode(String),
}

/// Frame a snapshot for writing to disk
pub fn encode(snapshot: &IndexSnapshot) -> Result<Vec<u8>> {
    let payload = bincode::DefaultOptions::new()
        .serialize(snapshot)
        .map_err(|e| RecallError::Serialization(format!("Failed to encode index: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&Sha256::digest(&payload));
    Ok(out)
}

/// Validate framing and checksum, then decode the payload
pub fn decode(bytes: &[u8]) -> std::result::Result<IndexSnapshot, SnapshotError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[8..12]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let mut length = [0u8; 8];
    length.copy_from_slice(&bytes[12..HEADER_LEN]);
    let payload_len = usize::try_from(u64::from_le_bytes(length)).map_err(|_| {
        SnapshotError::Truncated {
            expected: usize::MAX,
            actual: bytes.len(),
        }
    })?;

    let expected = HEADER_LEN
        .checked_add(payload_len)
        .and_then(|n| n.checked_add(CHECKSUM_LEN))
        .unwrap_or(usize::MAX);
    if bytes.len() != expected {
        return Err(SnapshotError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];
    let checksum = &bytes[HEADER_LEN + payload_len..];
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    bincode::DefaultOptions::new()
        .with_limit(payload_len as u64)
        .deserialize(payload)
        .map_err(|e| SnapshotError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryDraft, MemoryId, Scope, Turn};

    fn sample() -> IndexSnapshot {
        let turn = Turn::new("alice", "I like green tea", Scope::channel("g", "c"));
        IndexSnapshot {
            dimension: 3,
            next_id: 2,
            records: vec![MemoryDraft::turn(&turn, vec![0.1, 0.2, 0.3]).into_record(MemoryId(1))],
        }
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = sample();
        let bytes = encode(&snapshot).unwrap();
        assert_eq!(decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(decode(b"garbage-garbage-garbage"), Err(SnapshotError::BadMagic));
        assert_eq!(decode(b""), Err(SnapshotError::BadMagic));
    }

    #[test]
    fn test_truncated_file() {
        let bytes = encode(&sample()).unwrap();
        let cut = &bytes[..bytes.len() - 10];
        assert!(matches!(decode(cut), Err(SnapshotError::Truncated { .. })));
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[HEADER_LEN + 3] ^= 0xff;
        assert_eq!(decode(&bytes), Err(SnapshotError::ChecksumMismatch));
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[8] = 9;
        assert_eq!(decode(&bytes), Err(SnapshotError::UnsupportedVersion(9)));
    }
}
