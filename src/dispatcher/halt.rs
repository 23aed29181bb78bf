//! Run-level stop signal shared by sequential and pooled execution

use crate::types::HaltReason;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

const REASON_NONE: u8 = 0;
const REASON_EXHAUSTED: u8 = 1;
const REASON_INTERRUPTED: u8 = 2;

/// Cooperative stop signal for a dispatcher
///
/// Once tripped, no new item starts; items already running finish normally.
/// The first caller to trip the signal decides its [`HaltReason`].
#[derive(Clone, Debug, Default)]
pub struct HaltSignal {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl HaltSignal {
    /// Create an untripped signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal; returns true if this call was the first to do so
    pub fn trip(&self, reason: HaltReason) -> bool {
        let code = match reason {
            HaltReason::CredentialsExhausted => REASON_EXHAUSTED,
            HaltReason::Interrupted => REASON_INTERRUPTED,
        };
        let first = self
            .reason
            .compare_exchange(REASON_NONE, code, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.token.cancel();
        first
    }

    /// Trip the signal as an external interrupt
    pub fn interrupt(&self) -> bool {
        self.trip(HaltReason::Interrupted)
    }

    /// Whether the signal has been tripped
    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the signal was tripped, if it was
    pub fn reason(&self) -> Option<HaltReason> {
        match self.reason.load(Ordering::SeqCst) {
            REASON_EXHAUSTED => Some(HaltReason::CredentialsExhausted),
            REASON_INTERRUPTED => Some(HaltReason::Interrupted),
            _ => None,
        }
    }

    /// Wait until the signal is tripped
    pub async fn tripped(&self) {
        self.token.cancelled().await;
    }
}
