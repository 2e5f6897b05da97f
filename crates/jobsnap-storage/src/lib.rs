//! Snapshot input and table output persistence for jobsnap.
//!
//! The raw snapshot is read-only input produced by the external ingestion
//! step. Output tables use full-overwrite semantics: each run atomically
//! replaces the previous version of a table, never patches it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use jobsnap_core::RawPosting;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobsnap-storage";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("reading snapshot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing snapshot {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read the raw posting snapshot: a JSON array of loosely-typed rows.
pub async fn read_raw_snapshot(path: impl AsRef<Path>) -> Result<Vec<RawPosting>, SnapshotError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).await.map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SnapshotError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct StoredTable {
    pub name: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
    /// Whether a prior version of the table existed and was overwritten.
    pub replaced: bool,
}

/// Flat directory of output tables, replaced wholesale on each run.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
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

    pub fn table_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Atomically replace a table file: write to a temp sibling, flush,
    /// rename over the destination. A partially-written table is never
    /// observable at the final path.
    pub async fn replace_table(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredTable> {
        let absolute_path = self.table_path(file_name);
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating table directory {}", self.root.display()))?;

        let replaced = fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking table path {}", absolute_path.display()))?;

        let temp_path = self.root.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp table file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp table file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp table file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp table {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        let content_hash = Self::sha256_hex(bytes);
        debug!(table = file_name, %content_hash, bytes = bytes.len(), replaced, "table replaced");

        Ok(StoredTable {
            name: file_name.to_string(),
            relative_path: PathBuf::from(file_name),
            absolute_path,
            content_hash,
            byte_size: bytes.len(),
            replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn table_hashing_is_stable() {
        let hash = TableStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn replace_table_overwrites_prior_version() {
        let dir = tempdir().expect("tempdir");
        let store = TableStore::new(dir.path());

        let first = store
            .replace_table("normalized_postings.parquet", b"run-one")
            .await
            .expect("first write");
        let second = store
            .replace_table("normalized_postings.parquet", b"run-two")
            .await
            .expect("second write");

        assert!(!first.replaced);
        assert!(second.replaced);
        assert_eq!(first.absolute_path, second.absolute_path);
        assert_ne!(first.content_hash, second.content_hash);

        let on_disk = std::fs::read(&second.absolute_path).expect("read back");
        assert_eq!(on_disk, b"run-two");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn snapshot_reader_parses_rows_and_flags_bad_input() {
        let dir = tempdir().expect("tempdir");
        let good = dir.path().join("snapshot.json");
        std::fs::write(
            &good,
            r#"[{"Title": "Data Analyst", "Company": "Acme", "Rating": 4.1}]"#,
        )
        .expect("write fixture");

        let rows = read_raw_snapshot(&good).await.expect("parse snapshot");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title.as_deref(), Some("Data Analyst"));
        assert_eq!(rows[0].rating, Some(4.1));

        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, "{not json").expect("write fixture");
        let err = read_raw_snapshot(&bad).await.expect_err("malformed must fail");
        assert!(matches!(err, SnapshotError::Malformed { .. }));

        let missing = dir.path().join("absent.json");
        let err = read_raw_snapshot(&missing).await.expect_err("missing must fail");
        assert!(matches!(err, SnapshotError::Io { .. }));
    }
}
