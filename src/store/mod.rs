//! Document storage seam
//!
//! The dispatcher reads sources, checks and writes outputs, and consults the
//! content cache exclusively through [`DocumentStore`]. [`FsDocumentStore`] is
//! the production implementation; tests use in-memory stores.

mod discovery;
mod fs;
mod listing;

pub use discovery::{
    ChapterRange, DiscoveryOptions, OUTPUT_SUFFIX, default_output_dir, discover_documents,
    first_number,
};
pub use fs::{CacheRecord, DEFAULT_CACHE_DIR, FsDocumentStore};
pub use listing::looks_like_listing;

use crate::config::QualityPolicy;
use crate::error::StoreError;
use crate::types::DocumentRef;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage for sources, outputs and cached results
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the source content of `doc`
    async fn read(&self, doc: &DocumentRef) -> StoreResult<String>;

    /// Current output for `doc`, if one exists
    async fn existing_output(&self, doc: &DocumentRef) -> StoreResult<Option<String>>;

    /// Whether an existing output passes `policy`
    ///
    /// Returns `Ok(false)` when there is no output at all.
    async fn existing_output_valid(&self, doc: &DocumentRef, policy: &QualityPolicy) -> StoreResult<bool> {
        Ok(self
            .existing_output(doc)
            .await?
            .is_some_and(|output| policy.accepts(&output)))
    }

    /// Remove the output for `doc` (no-op if absent)
    async fn discard_output(&self, doc: &DocumentRef) -> StoreResult<()>;

    /// Write `content` as the output for `doc`
    async fn persist(&self, doc: &DocumentRef, content: &str) -> StoreResult<()>;

    /// Cached result for this exact source content
    async fn cached_result(&self, doc: &DocumentRef, content: &str) -> StoreResult<Option<String>>;

    /// Remember `result` as the condensation of `original`
    async fn write_cache(&self, doc: &DocumentRef, original: &str, result: &str) -> StoreResult<()>;

    /// Whether `content` is a table of contents that should be saved unchanged
    fn is_listing_document(&self, content: &str) -> bool {
        looks_like_listing(content)
    }
}
