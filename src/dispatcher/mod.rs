//! Work-item scheduling
//!
//! The [`Dispatcher`] drives a list of documents through the per-item
//! algorithm, either one at a time or on a bounded pool of concurrent item
//! futures.
//!
//! Both modes share the same [`HaltSignal`]: every item checks it (and the
//! pool's exhausted flag) before starting, so once the credentials run out or
//! an interrupt arrives the remaining items are recorded as
//! [`ItemStatus::Unprocessed`] without being dispatched. Items already in
//! flight run to completion.

mod halt;
mod process_item;
mod progress;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

pub use halt::HaltSignal;
pub use progress::ProgressSink;

use crate::condenser::RemoteCondenser;
use crate::config::DispatchConfig;
use crate::credential_pool::CredentialPool;
use crate::stats::{RunSummary, StatsAggregator};
use crate::store::DocumentStore;
use crate::types::{
    CredentialId, DispatchOutcome, DocumentRef, Event, HaltReason, ItemStatus, OutcomeTag, WorkItem,
};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// How items are scheduled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One item at a time, in input order
    Sequential,
    /// Up to `workers` items concurrently (None = `CredentialPool::max_concurrency`)
    Pooled {
        /// Explicit worker count
        workers: Option<usize>,
    },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Pooled { workers: None }
    }
}

/// Per-run options
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Ignore existing outputs and cached results
    pub force: bool,
    /// Scheduling strategy
    pub mode: ExecutionMode,
    /// Credential tried first on every item's first attempt
    pub preferred_credential: Option<CredentialId>,
}

/// Result of [`Dispatcher::run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Finalized statistics
    pub summary: RunSummary,
    /// Every item with its terminal status, in input order
    pub items: Vec<WorkItem>,
    /// Why dispatching stopped early, if it did
    pub halted: Option<HaltReason>,
}

impl RunReport {
    /// Number of items that ended with `status`
    pub fn count_status(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Terminal status of the item at `index`
    pub fn status_of(&self, index: usize) -> Option<ItemStatus> {
        self.items.get(index).map(|i| i.status)
    }
}

/// Schedules documents onto the credential pool
///
/// A dispatcher is bound to one [`CredentialPool`]. Its [`HaltSignal`] stays
/// tripped once the pool is exhausted or an interrupt arrives.
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    store: Arc<dyn DocumentStore>,
    condenser: Arc<dyn RemoteCondenser>,
    config: Arc<DispatchConfig>,
    halt: HaltSignal,
    progress: Option<Arc<dyn ProgressSink>>,
    event_tx: broadcast::Sender<Event>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        pool: Arc<CredentialPool>,
        store: Arc<dyn DocumentStore>,
        condenser: Arc<dyn RemoteCondenser>,
        config: DispatchConfig,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool,
            store,
            condenser,
            config: Arc::new(config),
            halt: HaltSignal::new(),
            progress: None,
            event_tx,
        }
    }

    /// Attach a progress sink
    #[must_use]
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Share an externally created halt signal
    #[must_use]
    pub fn with_halt_signal(mut self, halt: HaltSignal) -> Self {
        self.halt = halt;
        self
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Handle for stopping the dispatcher from outside
    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// Credential pool used by this dispatcher
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    fn emit_event(&self, event: Event) {
        // send() only fails when nobody is subscribed
        self.event_tx.send(event).ok();
    }

    /// Process `docs` and return the finalized report
    ///
    /// Per-item failures never abort the run: every document ends with exactly
    /// one terminal status in the returned report.
    pub async fn run(&self, docs: Vec<DocumentRef>, options: RunOptions) -> RunReport {
        let total = docs.len();
        let workers = match options.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Pooled { workers } => workers
                .unwrap_or_else(|| self.pool.max_concurrency())
                .max(1),
        };

        let stats = StatsAggregator::new(total);
        let ctx = RunContext {
            dispatcher: self,
            stats: &stats,
            total,
            force: options.force,
            preferred: options.preferred_credential,
            early_stop_reported: AtomicBool::new(false),
        };

        tracing::info!(
            total,
            workers,
            mode = ?options.mode,
            force = options.force,
            credentials = self.pool.usable_count(),
            "Starting run"
        );
        self.emit_event(Event::RunStarted { total, workers });

        let items = docs
            .into_iter()
            .enumerate()
            .map(|(index, doc)| WorkItem::new(index, doc));

        let mut finished: Vec<WorkItem> = if workers == 1 {
            let mut out = Vec::with_capacity(total);
            for item in items {
                out.push(ctx.run_item(item).await);
            }
            out
        } else {
            stream::iter(items)
                .map(|item| ctx.run_item(item))
                .buffer_unordered(workers)
                .collect()
                .await
        };
        finished.sort_by_key(|item| item.index);

        let summary = stats.finalize();
        let halted = self.halt.reason();

        tracing::info!(
            succeeded = summary.success_count,
            failed = summary.failed_count,
            unprocessed = summary.unprocessed_count,
            elapsed_secs = summary.wall_clock.as_secs_f64(),
            halted = ?halted,
            "Run complete"
        );
        self.emit_event(Event::RunComplete {
            succeeded: summary.success_count,
            failed: summary.failed_count,
            unprocessed: summary.unprocessed_count,
        });

        RunReport {
            summary,
            items: finished,
            halted,
        }
    }
}

/// State shared by every item of one run
pub(crate) struct RunContext<'a> {
    dispatcher: &'a Dispatcher,
    stats: &'a StatsAggregator,
    total: usize,
    force: bool,
    preferred: Option<CredentialId>,
    early_stop_reported: AtomicBool,
}

impl RunContext<'_> {
    /// Whether new items must not start
    ///
    /// Consults the pool directly as well as the signal, so an item never
    /// starts after exhaustion even if no worker has tripped the signal yet.
    fn halt_requested(&self) -> bool {
        let halt = &self.dispatcher.halt;
        if !halt.is_tripped() {
            if !self.dispatcher.pool.all_exhausted() {
                return false;
            }
            halt.trip(HaltReason::CredentialsExhausted);
        }
        self.report_early_stop();
        true
    }

    /// Trip the halt signal because no credential is left
    fn trip_exhausted(&self) {
        self.dispatcher.halt.trip(HaltReason::CredentialsExhausted);
        self.report_early_stop();
    }

    fn report_early_stop(&self) {
        if self.early_stop_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = self
            .dispatcher
            .halt
            .reason()
            .unwrap_or(HaltReason::Interrupted);
        tracing::warn!(%reason, "Early stop: no further items will be started");
        self.dispatcher.emit_event(Event::EarlyStop { reason });
    }

    fn notify(&self, completed: u64, message: &str) {
        if let Some(sink) = &self.dispatcher.progress {
            sink.on_progress(completed as usize, self.total, message);
        }
    }

    async fn run_item(&self, mut item: WorkItem) -> WorkItem {
        if self.halt_requested() {
            item.status = ItemStatus::Unprocessed;
            let completed = self.stats.record_unprocessed(&item.doc);
            tracing::debug!(document = %item.doc, "Not started, run halted");
            self.dispatcher.emit_event(Event::ItemFinished {
                index: item.index,
                doc: item.doc.clone(),
                status: item.status,
                tag: None,
            });
            self.notify(completed, &format!("{} [unprocessed]", item.doc));
            return item;
        }

        item.status = ItemStatus::InFlight;
        self.dispatcher.emit_event(Event::ItemStarted {
            index: item.index,
            doc: item.doc.clone(),
        });

        let start = Instant::now();
        let outcome = match AssertUnwindSafe(process_item::process_item(self, &item.doc))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                tracing::error!(document = %item.doc, error = %detail, "Item processing panicked");
                DispatchOutcome::failure(
                    OutcomeTag::Error,
                    start.elapsed(),
                    0,
                    0,
                    format!("unexpected fault: {detail}"),
                )
            }
        };

        item.attempts = outcome.attempts;
        item.status = outcome.status();
        let completed = self.stats.record(&item.doc, &outcome);

        self.dispatcher.emit_event(Event::ItemFinished {
            index: item.index,
            doc: item.doc.clone(),
            status: item.status,
            tag: Some(outcome.tag),
        });
        self.notify(completed, &format!("{} [{}]", item.doc, outcome.tag));
        item
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
