//! # condense-dispatch
//!
//! Concurrent dispatch and credential-rotation engine for batch text
//! condensation.
//!
//! ## Design Philosophy
//!
//! condense-dispatch is designed to be:
//! - **Rate-limit aware** - Every credential carries its own RPM budget and the
//!   worker count is derived from the combined budget
//! - **Failure tolerant** - A bad credential is skipped, not fatal; a failed
//!   item is recorded, never propagated
//! - **Library-first** - The remote call and document storage are traits, so
//!   any provider or storage backend can be plugged in
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use condense_dispatch::{
//!     Config, CredentialPool, Dispatcher, FsDocumentStore, RunOptions,
//!     condenser::RemoteCondenser, store::{DiscoveryOptions, discover_documents},
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example(condenser: Arc<dyn RemoteCondenser>) -> condense_dispatch::Result<()> {
//! let (config, _path) = Config::discover(None)?;
//! let pool = Arc::new(CredentialPool::new(&config)?);
//! let store = Arc::new(FsDocumentStore::new("novel_脱水"));
//!
//! let docs = discover_documents(Path::new("novel"), &DiscoveryOptions::default())?;
//! let dispatcher = Dispatcher::new(pool, store, condenser, config.dispatch.clone());
//!
//! let mut events = dispatcher.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let report = dispatcher.run(docs, RunOptions::default()).await;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote condensation trait and credential probe
pub mod condenser;
/// Configuration types
pub mod config;
/// Credential rotation and concurrency sizing
pub mod credential_pool;
/// Work-item scheduling
pub mod dispatcher;
/// Error types
pub mod error;
/// Run statistics
pub mod stats;
/// Document storage, cache and discovery
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use condenser::{CredentialCheck, RemoteCondenser, probe_credentials};
pub use config::{Config, CredentialConfig, DispatchConfig, QualityPolicy, StoreConfig};
pub use credential_pool::{Acquisition, CredentialHealth, CredentialLease, CredentialPool};
pub use dispatcher::{Dispatcher, ExecutionMode, HaltSignal, ProgressSink, RunOptions, RunReport};
pub use error::{CondenseError, Error, Result, StoreError};
pub use stats::{RunSummary, StatsAggregator};
pub use store::{DocumentStore, FsDocumentStore};
pub use types::{
    CredentialId, DispatchOutcome, DocumentRef, Event, HaltReason, ItemStatus, OutcomeTag, WorkItem,
};

/// Trip `halt` when a termination signal arrives.
///
/// Spawns a background task that waits for a signal and then calls
/// [`HaltSignal::interrupt`]: items not yet started are recorded as
/// unprocessed, items in flight finish normally. The task also ends if the
/// signal is tripped for another reason first.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever handler registers.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// If no listener can be installed the task waits until the halt trips.
///
/// # Example
///
/// ```no_run
/// use condense_dispatch::{Dispatcher, interrupt_on_signal};
///
/// # fn example(dispatcher: &Dispatcher) {
/// let _guard = interrupt_on_signal(dispatcher.halt_signal());
/// # }
/// ```
pub fn interrupt_on_signal(halt: HaltSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(interrupt_when(halt, stop_signal()))
}

/// Interrupt `halt` when `signal` resolves, unless it trips first
async fn interrupt_when(halt: HaltSignal, signal: impl Future<Output = &'static str>) {
    tokio::select! {
        name = signal => {
            if halt.interrupt() {
                tracing::warn!(
                    signal = name,
                    "Interrupted: in-flight items will finish, remaining items are left unprocessed"
                );
            } else {
                tracing::debug!(signal = name, "Signal received after the run had already stopped");
            }
        }
        _ = halt.tripped() => {}
    }
}

/// Resolves with the name of the first stop signal received
#[cfg(unix)]
async fn stop_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        },
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "No SIGINT handler, runs stop only on SIGTERM");
            sigterm.recv().await;
            "SIGTERM"
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "No SIGTERM handler, runs stop only on SIGINT");
            sigint.recv().await;
            "SIGINT"
        }
        (Err(e), Err(_)) => {
            tracing::warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn stop_signal() -> &'static str {
    ctrl_c().await
}

/// Never resolves if Ctrl+C cannot be observed, so a listener failure is not
/// mistaken for an interrupt.
async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C, runs stop only when credentials run out");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
