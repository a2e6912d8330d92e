//! External collaborator seams: content blobs and per-page metadata.
//!
//! The coordinator's own snapshot is authoritative; these stores are shared
//! with operators and may be swapped for any object store + relational
//! store. Metadata upserts happen after the snapshot barrier and are
//! best-effort; blob writes happen before a report is applied and abort it
//! on failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
}

/// One fetched page, keyed by `(run_id, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub run_id: String,
    pub url: String,
    pub domain: String,
    pub status: u16,
    pub content_hash: Option<String>,
    pub content_size: u64,
    pub response_time_ms: Option<u64>,
    pub fetched_at: u64,
    pub error: Option<String>,
}

pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

pub trait PageMetadataStore: Send + Sync {
    fn upsert(&self, record: &PageRecord) -> Result<(), StoreError>;

    fn get(&self, run_id: &str, url: &str) -> Result<Option<PageRecord>, StoreError>;
}

/// Key for a stored page body: `{runId}/{hostname}/{hash16}.html`.
pub fn blob_key(run_id: &str, hostname: &str, content_hash: &str) -> String {
    let short = &content_hash[..content_hash.len().min(16)];
    format!("{}/{}/{}.html", run_id, hostname, short)
}

/// Filesystem-backed blob store; keys map to relative paths under the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Keys are coordinator-generated, but refuse traversal anyway.
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.resolve(key)?;
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Page metadata in a sled tree, JSON-encoded records keyed `(run_id, url)`.
pub struct SledPageStore {
    tree: sled::Tree,
}

impl SledPageStore {
    pub fn new(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree("pages")?,
        })
    }

    fn key(run_id: &str, url: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(run_id.len() + url.len() + 1);
        key.extend_from_slice(run_id.as_bytes());
        key.push(0);
        key.extend_from_slice(url.as_bytes());
        key
    }
}

impl PageMetadataStore for SledPageStore {
    fn upsert(&self, record: &PageRecord) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(record)?;
        self.tree
            .insert(Self::key(&record.run_id, &record.url), encoded)?;
        Ok(())
    }

    fn get(&self, run_id: &str, url: &str) -> Result<Option<PageRecord>, StoreError> {
        match self.tree.get(Self::key(run_id, url))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
