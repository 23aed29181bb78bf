//! Filesystem-backed document store
//!
//! Outputs are written to `output_dir/<file name>`. Cached results live in
//! `cache_dir/<sha256 of source>.json`, so an unchanged source is recognized
//! regardless of its path.

use super::{DocumentStore, StoreResult};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::DocumentRef;
use crate::utils::{char_len, is_blank};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default cache directory name, created inside the output directory
pub const DEFAULT_CACHE_DIR: &str = ".condense_cache";

/// One cache entry as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Source document the entry was created from
    pub source: PathBuf,
    /// Source length in characters
    pub original_chars: usize,
    /// Result length in characters
    pub result_chars: usize,
    /// Condensed text
    pub result: String,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// [`DocumentStore`] on the local filesystem
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    output_dir: PathBuf,
    cache_dir: PathBuf,
}

impl FsDocumentStore {
    /// Store writing to `output_dir`, caching in `output_dir/.condense_cache`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let cache_dir = output_dir.join(DEFAULT_CACHE_DIR);
        Self { output_dir, cache_dir }
    }

    /// Store from configuration, using `default_output` when none is configured
    pub fn from_config(config: &StoreConfig, default_output: &Path) -> Self {
        let store = Self::new(
            config
                .output_dir
                .clone()
                .unwrap_or_else(|| default_output.to_path_buf()),
        );
        match &config.cache_dir {
            Some(dir) => store.with_cache_dir(dir.clone()),
            None => store,
        }
    }

    /// Override the cache directory
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the output for `doc` is written
    pub fn output_path(&self, doc: &DocumentRef) -> StoreResult<PathBuf> {
        doc.path()
            .file_name()
            .map(|name| self.output_dir.join(name))
            .ok_or_else(|| StoreError::InvalidReference(doc.path().to_path_buf()))
    }

    /// Where the cache entry for `content` is written
    pub fn cache_path(&self, content: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", content_hash(content)))
    }

    async fn load_record(path: &Path) -> StoreResult<Option<CacheRecord>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::CorruptCache {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Hex SHA-256 of `content`
pub(crate) fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn write_file(path: &Path, content: &str) -> StoreResult<()> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, content).await.map_err(write_err)
}

#[async_trait::async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read(&self, doc: &DocumentRef) -> StoreResult<String> {
        tokio::fs::read_to_string(doc.path())
            .await
            .map_err(|source| StoreError::Read {
                path: doc.path().to_path_buf(),
                source,
            })
    }

    async fn existing_output(&self, doc: &DocumentRef) -> StoreResult<Option<String>> {
        let path = self.output_path(doc)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    async fn discard_output(&self, doc: &DocumentRef) -> StoreResult<()> {
        let path = self.output_path(doc)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed stale output");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove { path, source }),
        }
    }

    async fn persist(&self, doc: &DocumentRef, content: &str) -> StoreResult<()> {
        let path = self.output_path(doc)?;
        write_file(&path, content).await
    }

    async fn cached_result(&self, doc: &DocumentRef, content: &str) -> StoreResult<Option<String>> {
        let path = self.cache_path(content);
        match Self::load_record(&path).await {
            Ok(Some(record)) if !is_blank(&record.result) => Ok(Some(record.result)),
            Ok(_) => Ok(None),
            Err(e @ StoreError::CorruptCache { .. }) => {
                tracing::warn!(document = %doc, error = %e, "Ignoring corrupt cache entry");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_cache(&self, doc: &DocumentRef, original: &str, result: &str) -> StoreResult<()> {
        let path = self.cache_path(original);
        let record = CacheRecord {
            source: doc.path().to_path_buf(),
            original_chars: char_len(original),
            result_chars: char_len(result),
            result: result.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| StoreError::CorruptCache {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_file(&path, &json).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityPolicy;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FsDocumentStore, DocumentRef) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input").join("chapter_01.txt");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, "第一章 正文").unwrap();
        let store = FsDocumentStore::new(dir.path().join("output"));
        (dir, store, DocumentRef::new(source))
    }

    #[tokio::test]
    async fn persist_creates_output_directory() {
        let (_dir, store, doc) = setup();

        store.persist(&doc, "condensed").await.unwrap();

        let path = store.output_path(&doc).unwrap();
        assert_eq!(path.file_name().unwrap(), "chapter_01.txt");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "condensed");
        assert_eq!(store.existing_output(&doc).await.unwrap().as_deref(), Some("condensed"));
    }

    #[tokio::test]
    async fn missing_output_is_none_and_discard_is_idempotent() {
        let (_dir, store, doc) = setup();

        assert!(store.existing_output(&doc).await.unwrap().is_none());
        store.discard_output(&doc).await.unwrap();

        store.persist(&doc, "x").await.unwrap();
        store.discard_output(&doc).await.unwrap();
        assert!(store.existing_output(&doc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn existing_output_validity_uses_policy() {
        let (_dir, store, doc) = setup();
        let policy = QualityPolicy::default();

        assert!(!store.existing_output_valid(&doc, &policy).await.unwrap());

        store.persist(&doc, "错误：超时").await.unwrap();
        assert!(!store.existing_output_valid(&doc, &policy).await.unwrap());

        store.persist(&doc, &"文".repeat(400)).await.unwrap();
        assert!(store.existing_output_valid(&doc, &policy).await.unwrap());
    }

    #[tokio::test]
    async fn read_failure_names_the_path() {
        let (dir, store, _) = setup();
        let missing = DocumentRef::new(dir.path().join("nope.txt"));

        let err = store.read(&missing).await.unwrap_err();

        assert!(matches!(err, StoreError::Read { ref path, .. } if path.ends_with("nope.txt")));
    }

    #[tokio::test]
    async fn cache_is_keyed_by_content() {
        let (dir, store, doc) = setup();
        let content = store.read(&doc).await.unwrap();

        assert!(store.cached_result(&doc, &content).await.unwrap().is_none());
        store.write_cache(&doc, &content, "摘要").await.unwrap();

        let renamed = DocumentRef::new(dir.path().join("elsewhere.txt"));
        assert_eq!(
            store.cached_result(&renamed, &content).await.unwrap().as_deref(),
            Some("摘要"),
            "same content under another name hits the cache"
        );
        assert!(store.cached_result(&doc, "changed").await.unwrap().is_none());

        let raw = std::fs::read_to_string(store.cache_path(&content)).unwrap();
        let record: CacheRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.original_chars, 6);
        assert_eq!(record.result_chars, 2);
        assert_eq!(record.source, doc.path());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_a_miss() {
        let (_dir, store, doc) = setup();
        let path = store.cache_path("content");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(store.cached_result(&doc, "content").await.unwrap().is_none());
        assert!(matches!(
            FsDocumentStore::load_record(&path).await,
            Err(StoreError::CorruptCache { .. })
        ));
    }

    #[test]
    fn config_overrides_directories() {
        let config = StoreConfig {
            output_dir: Some(PathBuf::from("/out")),
            cache_dir: Some(PathBuf::from("/cache")),
        };
        let store = FsDocumentStore::from_config(&config, Path::new("/default"));
        assert_eq!(store.output_dir(), Path::new("/out"));
        assert_eq!(store.cache_dir(), Path::new("/cache"));

        let store = FsDocumentStore::from_config(&StoreConfig::default(), Path::new("/default"));
        assert_eq!(store.cache_dir(), Path::new("/default/.condense_cache"));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = content_hash("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
