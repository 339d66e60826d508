//! Immutable, hash-addressed audit storage.
//!
//! Every raw export a reconciliation run consumes and every proposal record
//! it produces is written here content-addressed, so any heuristic match can
//! be traced back to the exact bytes it was derived from. Writes are
//! write-once: identical content lands on the same path and is detected as a
//! duplicate instead of rewritten.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ltx-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serializing audit record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StoredAuditRecord {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed store rooted at one directory, laid out as
/// `<run-stamp>/<label>/<sha256>.<ext>`.
#[derive(Debug, Clone)]
pub struct AuditStore {
    root: PathBuf,
}

impl AuditStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn record_relative_path(
        &self,
        run_at: DateTime<Utc>,
        label: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = run_at.format("%Y%m%d_%H%M%S").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(stamp)
            .join(label)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Serialize a proposal or summary record as pretty JSON and store it
    /// immutably alongside the raw exports it was derived from.
    pub async fn store_record<T: Serialize>(
        &self,
        run_at: DateTime<Utc>,
        label: &str,
        record: &T,
    ) -> Result<StoredAuditRecord, StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        Ok(self.store_bytes(run_at, label, "json", &bytes).await?)
    }

    /// Store bytes immutably using a hash-addressed path and atomic
    /// temp-file rename.
    pub async fn store_bytes(
        &self,
        run_at: DateTime<Utc>,
        label: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredAuditRecord> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.record_relative_path(run_at, label, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating audit directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking audit path {}", absolute_path.display()))?
        {
            return Ok(StoredAuditRecord {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_name = format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len());
        let temp_path = absolute_path
            .parent()
            .expect("audit path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp audit file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp audit file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp audit file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredAuditRecord {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredAuditRecord {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp audit file {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn run_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-07-01T00:00:00Z")
            .expect("ts")
            .with_timezone(&Utc)
    }

    #[test]
    fn content_hashing_is_stable() {
        let hash = AuditStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_export_bytes_deduplicate_by_hash_path() {
        let dir = tempdir().expect("tempdir");
        let store = AuditStore::new(dir.path());

        let first = store
            .store_bytes(run_at(), "square-2025-06", "json", b"[{\"id\":\"sq_1\"}]")
            .await
            .expect("first store");
        let second = store
            .store_bytes(run_at(), "square-2025-06", "json", b"[{\"id\":\"sq_1\"}]")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn proposal_records_are_stored_as_json() {
        let dir = tempdir().expect("tempdir");
        let store = AuditStore::new(dir.path());

        let stored = store
            .store_record(
                run_at(),
                "proposals",
                &json!({ "payment_id": "sq_1", "confidence": 75 }),
            )
            .await
            .expect("store record");

        assert!(stored.relative_path.to_string_lossy().ends_with(".json"));
        let text = std::fs::read_to_string(&stored.absolute_path).expect("read back");
        assert!(text.contains("sq_1"));
    }
}
