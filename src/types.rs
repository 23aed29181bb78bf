//! Core types for condense-dispatch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reference to one source document
///
/// The reference is opaque to the dispatcher; only the
/// [`DocumentStore`](crate::store::DocumentStore) interprets it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(pub PathBuf);

impl DocumentRef {
    /// Create a new DocumentRef
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Underlying path
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name component, if any
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl From<PathBuf> for DocumentRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&str> for DocumentRef {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Index of a credential within its pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub usize);

impl CredentialId {
    /// Get the inner index
    pub fn get(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a work item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet looked at
    Pending,
    /// A valid output already existed
    Skipped,
    /// Result served from the content cache
    CachedHit,
    /// Listing document saved unchanged
    DirectSave,
    /// Short document saved unchanged
    ShortSave,
    /// Remote attempts in progress
    InFlight,
    /// Remote condensation succeeded
    Succeeded,
    /// Item failed (read error, empty content, attempts used up, fault)
    Failed,
    /// Never started because the run halted first
    Unprocessed,
}

impl ItemStatus {
    /// Whether this status ends the item's lifecycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemStatus::Pending | ItemStatus::InFlight)
    }
}

/// Outcome label recorded in the run statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeTag {
    /// Condensed remotely
    Success,
    /// Served from cache
    SuccessCached,
    /// Listing document saved unchanged
    SuccessDirectory,
    /// Short document saved unchanged
    SuccessShort,
    /// Valid output already existed
    Skipped,
    /// Source content was empty
    Empty,
    /// Read failure or unexpected fault
    Error,
    /// All remote attempts failed or credentials ran out
    Failed,
}

impl OutcomeTag {
    /// Number of distinct tags
    pub const COUNT: usize = 8;

    /// All tags in display order
    pub const ALL: [OutcomeTag; Self::COUNT] = [
        OutcomeTag::Success,
        OutcomeTag::SuccessCached,
        OutcomeTag::SuccessDirectory,
        OutcomeTag::SuccessShort,
        OutcomeTag::Skipped,
        OutcomeTag::Empty,
        OutcomeTag::Error,
        OutcomeTag::Failed,
    ];

    /// Position of this tag in [`OutcomeTag::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Whether the item counts toward the success total (skips included)
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            OutcomeTag::Empty | OutcomeTag::Error | OutcomeTag::Failed
        )
    }

    /// Terminal item status implied by this tag
    pub fn status(&self) -> ItemStatus {
        match self {
            OutcomeTag::Success => ItemStatus::Succeeded,
            OutcomeTag::SuccessCached => ItemStatus::CachedHit,
            OutcomeTag::SuccessDirectory => ItemStatus::DirectSave,
            OutcomeTag::SuccessShort => ItemStatus::ShortSave,
            OutcomeTag::Skipped => ItemStatus::Skipped,
            OutcomeTag::Empty | OutcomeTag::Error | OutcomeTag::Failed => ItemStatus::Failed,
        }
    }

    /// Serialized name (`success-cached`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeTag::Success => "success",
            OutcomeTag::SuccessCached => "success-cached",
            OutcomeTag::SuccessDirectory => "success-directory",
            OutcomeTag::SuccessShort => "success-short",
            OutcomeTag::Skipped => "skipped",
            OutcomeTag::Empty => "empty",
            OutcomeTag::Error => "error",
            OutcomeTag::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one work item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Outcome label
    pub tag: OutcomeTag,
    /// Time spent on the item
    pub elapsed: Duration,
    /// Source length in characters
    pub original_chars: usize,
    /// Output length in characters
    pub result_chars: usize,
    /// Output length as a percentage of the source (None when the source was empty)
    pub ratio: Option<f64>,
    /// Number of remote calls made
    pub attempts: u32,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Outcome for an item that produced an output of `result_chars` from `original_chars`
    pub fn completed(
        tag: OutcomeTag,
        elapsed: Duration,
        original_chars: usize,
        result_chars: usize,
        attempts: u32,
    ) -> Self {
        Self {
            tag,
            elapsed,
            original_chars,
            result_chars,
            ratio: condensation_ratio(original_chars, result_chars),
            attempts,
            error: None,
        }
    }

    /// Outcome for a failed item
    pub fn failure(
        tag: OutcomeTag,
        elapsed: Duration,
        original_chars: usize,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tag,
            elapsed,
            original_chars,
            result_chars: 0,
            ratio: None,
            attempts,
            error: Some(error.into()),
        }
    }

    /// Terminal status of the item
    pub fn status(&self) -> ItemStatus {
        self.tag.status()
    }
}

/// `result / original * 100`, or None for empty sources
pub fn condensation_ratio(original_chars: usize, result_chars: usize) -> Option<f64> {
    if original_chars == 0 {
        return None;
    }
    Some(result_chars as f64 / original_chars as f64 * 100.0)
}

/// One unit of work tracked by the dispatcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Position in the input list
    pub index: usize,
    /// Document being processed
    pub doc: DocumentRef,
    /// Remote calls made so far
    pub attempts: u32,
    /// Current status
    pub status: ItemStatus,
}

impl WorkItem {
    /// Create a pending item
    pub fn new(index: usize, doc: DocumentRef) -> Self {
        Self {
            index,
            doc,
            attempts: 0,
            status: ItemStatus::Pending,
        }
    }
}

/// Why a run stopped dispatching new items
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Every credential was skipped
    CredentialsExhausted,
    /// External interrupt (signal or caller)
    Interrupted,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::CredentialsExhausted => f.write_str("all credentials exhausted"),
            HaltReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Run accepted its documents
    RunStarted {
        /// Number of documents in the run
        total: usize,
        /// Worker count (1 for sequential)
        workers: usize,
    },

    /// Item passed the halt check and began processing
    ItemStarted {
        /// Position in the input list
        index: usize,
        /// Document reference
        doc: DocumentRef,
    },

    /// Item reached a terminal status
    ItemFinished {
        /// Position in the input list
        index: usize,
        /// Document reference
        doc: DocumentRef,
        /// Terminal status
        status: ItemStatus,
        /// Outcome label (None for unprocessed items)
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<OutcomeTag>,
    },

    /// A credential hit its error threshold
    CredentialSkipped {
        /// Credential that was skipped
        credential: CredentialId,
        /// Consecutive errors observed
        errors: u32,
    },

    /// Dispatching stopped before all items started
    EarlyStop {
        /// Why the run halted
        reason: HaltReason,
    },

    /// Run finished and statistics were finalized
    RunComplete {
        /// Items counted as success
        succeeded: u64,
        /// Items that failed
        failed: u64,
        /// Items never started
        unprocessed: u64,
    },
}
