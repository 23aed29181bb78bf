//! Run statistics
//!
//! [`StatsAggregator`] is shared by `Arc` across the workers of one run.
//! Counters are atomics; per-item records go into a short-lived mutex.
//! [`StatsAggregator::finalize`] is the only way to obtain a [`RunSummary`].

use crate::types::{DispatchOutcome, DocumentRef, OutcomeTag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ItemRecord {
    doc: DocumentRef,
    tag: OutcomeTag,
    ratio: Option<f64>,
    error: Option<String>,
}

/// Thread-safe accumulator for one run
#[derive(Debug)]
pub struct StatsAggregator {
    total: u64,
    counts: [AtomicU64; OutcomeTag::COUNT],
    unprocessed: AtomicU64,
    completed: AtomicU64,
    records: Mutex<Vec<ItemRecord>>,
    unprocessed_docs: Mutex<Vec<DocumentRef>>,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Live counters, readable at any time during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Items in the run
    pub total: u64,
    /// Items that reached a terminal status
    pub completed: u64,
    /// Items counted as success (skips included)
    pub succeeded: u64,
    /// Items that failed
    pub failed: u64,
    /// Items never started
    pub unprocessed: u64,
}

/// Per-item entry in the summary's failure list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    /// Document that failed
    pub doc: DocumentRef,
    /// Outcome label
    pub tag: OutcomeTag,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Count per outcome tag (zero counts included)
    pub counts: BTreeMap<OutcomeTag, u64>,
    /// Items in the run
    pub files_seen: u64,
    /// Items counted as success (skips included)
    pub success_count: u64,
    /// Items that failed
    pub failed_count: u64,
    /// Items never started
    pub unprocessed_count: u64,
    /// Success count as a percentage of the items seen
    pub success_rate: f64,
    /// Mean condensation ratio over condensed items, fresh or cached
    pub average_ratio: Option<f64>,
    /// Time from aggregator creation to finalization
    pub wall_clock: Duration,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run was finalized
    pub finished_at: DateTime<Utc>,
    /// Items that failed, in completion order
    pub failed_items: Vec<FailedItem>,
    /// Items never started
    pub unprocessed_items: Vec<DocumentRef>,
}

impl StatsAggregator {
    /// Start accumulating for a run of `total` items
    pub fn new(total: usize) -> Self {
        Self {
            total: total as u64,
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            unprocessed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            records: Mutex::new(Vec::with_capacity(total)),
            unprocessed_docs: Mutex::new(Vec::new()),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Record a processed item; returns the number of completed items so far
    pub fn record(&self, doc: &DocumentRef, outcome: &DispatchOutcome) -> u64 {
        self.counts[outcome.tag.index()].fetch_add(1, Ordering::Relaxed);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ItemRecord {
                doc: doc.clone(),
                tag: outcome.tag,
                ratio: outcome.ratio,
                error: outcome.error.clone(),
            });
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record an item that never started; returns the number of completed items so far
    pub fn record_unprocessed(&self, doc: &DocumentRef) -> u64 {
        self.unprocessed.fetch_add(1, Ordering::Relaxed);
        self.unprocessed_docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(doc.clone());
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count recorded for one tag
    pub fn count(&self, tag: OutcomeTag) -> u64 {
        self.counts[tag.index()].load(Ordering::Relaxed)
    }

    /// Live counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let (succeeded, failed) = OutcomeTag::ALL.iter().fold((0, 0), |(ok, bad), tag| {
            let n = self.count(*tag);
            if tag.is_success() { (ok + n, bad) } else { (ok, bad + n) }
        });
        StatsSnapshot {
            total: self.total,
            completed: self.completed.load(Ordering::SeqCst),
            succeeded,
            failed,
            unprocessed: self.unprocessed.load(Ordering::Relaxed),
        }
    }

    /// Compute the final summary
    pub fn finalize(&self) -> RunSummary {
        let snapshot = self.snapshot();
        let counts = OutcomeTag::ALL
            .iter()
            .map(|tag| (*tag, self.count(*tag)))
            .collect();

        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let ratios: Vec<f64> = records
            .iter()
            .filter(|r| matches!(r.tag, OutcomeTag::Success | OutcomeTag::SuccessCached))
            .filter_map(|r| r.ratio)
            .collect();
        let average_ratio = if ratios.is_empty() {
            None
        } else {
            Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
        };

        let failed_items = records
            .into_iter()
            .filter(|r| !r.tag.is_success())
            .map(|r| FailedItem {
                doc: r.doc,
                tag: r.tag,
                error: r.error,
            })
            .collect();

        let unprocessed_items = self
            .unprocessed_docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let success_rate = if self.total == 0 {
            0.0
        } else {
            snapshot.succeeded as f64 / self.total as f64 * 100.0
        };

        RunSummary {
            counts,
            files_seen: self.total,
            success_count: snapshot.succeeded,
            failed_count: snapshot.failed,
            unprocessed_count: snapshot.unprocessed,
            success_rate,
            average_ratio,
            wall_clock: self.started.elapsed(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            failed_items,
            unprocessed_items,
        }
    }
}

impl RunSummary {
    /// Count for one tag
    pub fn count(&self, tag: OutcomeTag) -> u64 {
        self.counts.get(&tag).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Processed {} file(s) in {:.1}s", self.files_seen, self.wall_clock.as_secs_f64())?;
        writeln!(
            f,
            "  succeeded: {} ({:.1}%)  failed: {}  unprocessed: {}",
            self.success_count, self.success_rate, self.failed_count, self.unprocessed_count
        )?;
        for (tag, count) in self.counts.iter().filter(|(_, n)| **n > 0) {
            writeln!(f, "  {tag}: {count}")?;
        }
        if let Some(ratio) = self.average_ratio {
            writeln!(f, "  average condensation ratio: {ratio:.1}%")?;
        }
        if !self.failed_items.is_empty() {
            writeln!(f, "Failed:")?;
            for item in &self.failed_items {
                match &item.error {
                    Some(e) => writeln!(f, "  {} [{}] {e}", item.doc, item.tag)?,
                    None => writeln!(f, "  {} [{}]", item.doc, item.tag)?,
                }
            }
        }
        if !self.unprocessed_items.is_empty() {
            writeln!(f, "Unprocessed:")?;
            for doc in &self.unprocessed_items {
                writeln!(f, "  {doc}")?;
            }
        }
        Ok(())
    }
}
