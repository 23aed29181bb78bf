//! Fake remote condensers

use condense_dispatch::{CondenseError, CredentialLease, RemoteCondenser};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps the first third of the input; rejects keys starting with `bad`
#[derive(Default)]
pub struct TruncatingCondenser {
    calls: AtomicUsize,
}

impl TruncatingCondenser {
    /// Number of remote calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteCondenser for TruncatingCondenser {
    async fn condense(&self, content: &str, lease: &CredentialLease) -> Result<String, CondenseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if lease.key.starts_with("bad") {
            return Err(CondenseError::Rejected("API key not valid".to_string()));
        }
        let keep = content.chars().count() / 3;
        Ok(content.chars().take(keep).collect())
    }
}
