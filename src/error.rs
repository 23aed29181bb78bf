//! Error types for condense-dispatch
//!
//! This module provides the error handling for the library:
//! - [`Error`] is the crate-wide error used by configuration, pool construction
//!   and the document store
//! - [`StoreError`] carries context about which document a storage operation touched
//! - [`CondenseError`] describes a single failed remote condensation attempt
//!
//! Per-item failures never escape the dispatcher: they are converted into an
//! [`OutcomeTag`](crate::types::OutcomeTag) and recorded in the run statistics.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for condense-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for condense-dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_rpm")
        key: Option<String>,
    },

    /// No credential record is usable, so no run can start
    #[error("no usable credentials configured ({configured} record(s) present)")]
    NoUsableCredentials {
        /// Number of credential records that were present but unusable
        configured: usize,
    },

    /// Document store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Document discovery failed
    #[error("discovery error: {0}")]
    Discovery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the source document failed
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the document that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing an output document failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path of the output that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Removing a stale output failed
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// Path of the output that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A cache entry exists but could not be decoded
    #[error("corrupt cache entry {path}: {reason}")]
    CorruptCache {
        /// Path of the cache entry
        path: PathBuf,
        /// Why the entry was rejected
        reason: String,
    },

    /// The document reference has no usable file name
    #[error("invalid document reference {0}")]
    InvalidReference(PathBuf),
}

/// A single failed remote condensation attempt
///
/// Every variant is reported against the credential that was used, and the
/// dispatcher moves on to the next attempt with a different credential.
#[derive(Debug, Clone, Error)]
pub enum CondenseError {
    /// The remote call did not complete in time
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider rejected the call because of rate limiting
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// The provider refused the request (bad key, quota, safety block, ...)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The provider answered, but with no usable text
    #[error("empty response from provider")]
    EmptyResponse,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl CondenseError {
    /// Short machine-readable code, used in logs and events
    pub fn code(&self) -> &'static str {
        match self {
            CondenseError::Timeout(_) => "timeout",
            CondenseError::RateLimited(_) => "rate_limited",
            CondenseError::Rejected(_) => "rejected",
            CondenseError::EmptyResponse => "empty_response",
            CondenseError::Transport(_) => "transport",
        }
    }
}
