//! Credential rotation, error accounting and concurrency sizing
//!
//! The [`CredentialPool`] owns every credential of a run. Callers acquire a
//! [`CredentialLease`] per remote attempt and report the attempt's outcome back
//! with [`CredentialPool::report_success`] or [`CredentialPool::report_error`].
//!
//! # Concurrency
//!
//! All mutable state lives behind one `std::sync::Mutex`. No method awaits
//! while holding it: pacing is expressed as a `not_before` instant on the lease,
//! and the caller sleeps after the lock is released. The "every credential is
//! skipped" condition is mirrored into an `AtomicBool` so the dispatcher can
//! check it on every item without taking the lock.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::CredentialId;
use crate::utils::mask_secret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of one credential's state
#[derive(Clone)]
pub struct Credential {
    /// Position in the pool
    pub id: CredentialId,
    /// Secret API key
    pub key: String,
    /// Endpoint override
    pub redirect_url: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Requests-per-minute budget
    pub rpm: u32,
    /// Consecutive errors since the last success
    pub errors: u32,
    /// Skipped for the rest of the run
    pub skipped: bool,
    /// Leases handed out so far
    pub uses: u64,
    /// When the last lease was handed out
    pub last_used: Option<Instant>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("key", &mask_secret(&self.key))
            .field("redirect_url", &self.redirect_url)
            .field("model", &self.model)
            .field("rpm", &self.rpm)
            .field("errors", &self.errors)
            .field("skipped", &self.skipped)
            .field("uses", &self.uses)
            .finish()
    }
}

/// Permission to make one remote call with a specific credential
#[derive(Clone)]
pub struct CredentialLease {
    /// Credential this lease belongs to
    pub id: CredentialId,
    /// Secret API key
    pub key: String,
    /// Endpoint override
    pub redirect_url: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Earliest instant the call may be made (None when pacing is off)
    pub not_before: Option<Instant>,
}

impl CredentialLease {
    /// Sleep until the lease's pacing slot
    pub async fn wait_for_slot(&self) {
        if let Some(at) = self.not_before {
            tokio::time::sleep_until(at).await;
        }
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("id", &self.id)
            .field("key", &mask_secret(&self.key))
            .field("redirect_url", &self.redirect_url)
            .field("model", &self.model)
            .field("not_before", &self.not_before)
            .finish()
    }
}

/// Result of [`CredentialPool::acquire`]
#[derive(Debug)]
pub enum Acquisition {
    /// A usable credential was leased
    Granted(CredentialLease),
    /// Every credential is skipped
    Exhausted,
}

/// Credential state after an error was reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialHealth {
    /// Still usable
    Healthy {
        /// Consecutive errors so far
        errors: u32,
    },
    /// This report pushed the credential over the threshold
    JustSkipped {
        /// Consecutive errors that triggered the skip
        errors: u32,
    },
    /// The credential had already been skipped
    AlreadySkipped,
}

struct Slot {
    credential: Credential,
    next_slot: Option<Instant>,
}

/// Pool of rate-limited credentials shared by all workers of a run
pub struct CredentialPool {
    slots: Mutex<Vec<Slot>>,
    exhausted: AtomicBool,
    error_threshold: u32,
    max_rpm: u32,
    max_workers: usize,
    assumed_call_duration: Duration,
    pace_requests: bool,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.snapshot())
            .field("exhausted", &self.all_exhausted())
            .field("error_threshold", &self.error_threshold)
            .field("max_rpm", &self.max_rpm)
            .finish()
    }
}

impl CredentialPool {
    /// Build a pool from the usable credentials of `config`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoUsableCredentials`] if no record is usable.
    pub fn new(config: &Config) -> Result<Self> {
        let default_rpm = config.dispatch.default_rpm;
        let slots: Vec<Slot> = config
            .usable_credentials()
            .enumerate()
            .map(|(i, record)| Slot {
                credential: Credential {
                    id: CredentialId(i),
                    key: record.key.trim().to_string(),
                    redirect_url: record.redirect_url.clone(),
                    model: record.model.clone(),
                    rpm: record.effective_rpm(default_rpm),
                    errors: 0,
                    skipped: false,
                    uses: 0,
                    last_used: None,
                },
                next_slot: None,
            })
            .collect();

        if slots.is_empty() {
            return Err(Error::NoUsableCredentials {
                configured: config.credentials.len(),
            });
        }

        for slot in &slots {
            let c = &slot.credential;
            tracing::debug!(
                credential = %c.id,
                key = %mask_secret(&c.key),
                rpm = c.rpm,
                model = ?c.model,
                "Registered credential"
            );
        }

        Ok(Self {
            slots: Mutex::new(slots),
            exhausted: AtomicBool::new(false),
            error_threshold: config.dispatch.error_threshold.max(1),
            max_rpm: config.max_rpm.max(1),
            max_workers: config.dispatch.max_workers.max(1),
            assumed_call_duration: config.dispatch.assumed_call_duration,
            pace_requests: config.dispatch.pace_requests,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease a credential for one remote attempt
    ///
    /// A non-skipped `preferred` credential is returned as-is. Otherwise the
    /// least-recently-used non-skipped credential outside `avoid` is chosen,
    /// falling back to an avoided one when nothing else is left.
    pub fn acquire(&self, preferred: Option<CredentialId>, avoid: &[CredentialId]) -> Acquisition {
        let mut slots = self.lock();

        let usable = |slot: &&Slot| !slot.credential.skipped;
        let lru = |exclude_avoided: bool| {
            slots
                .iter()
                .filter(usable)
                .filter(|s| !exclude_avoided || !avoid.contains(&s.credential.id))
                .min_by_key(|s| (s.credential.last_used, s.credential.id))
                .map(|s| s.credential.id)
        };

        let chosen = preferred
            .filter(|id| slots.get(id.0).is_some_and(|s| !s.credential.skipped))
            .or_else(|| lru(true))
            .or_else(|| lru(false));

        let Some(id) = chosen else {
            return Acquisition::Exhausted;
        };

        let now = Instant::now();
        let pace = self.pace_requests;
        let slot = &mut slots[id.0];
        let not_before = if pace {
            let at = slot.next_slot.map_or(now, |next| next.max(now));
            slot.next_slot = Some(at + rpm_spacing(slot.credential.rpm));
            Some(at)
        } else {
            None
        };
        slot.credential.last_used = Some(now);
        slot.credential.uses += 1;

        let c = &slot.credential;
        Acquisition::Granted(CredentialLease {
            id: c.id,
            key: c.key.clone(),
            redirect_url: c.redirect_url.clone(),
            model: c.model.clone(),
            not_before,
        })
    }

    /// Record a successful call; resets the credential's error count
    pub fn report_success(&self, id: CredentialId) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(id.0) {
            slot.credential.errors = 0;
        }
    }

    /// Record a failed call
    ///
    /// Reaching the error threshold skips this credential only. Skipping the
    /// last usable credential sets the exhausted flag before the lock is released.
    pub fn report_error(&self, id: CredentialId) -> CredentialHealth {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(id.0) else {
            tracing::debug!(credential = %id, "Error reported for unknown credential");
            return CredentialHealth::AlreadySkipped;
        };

        if slot.credential.skipped {
            return CredentialHealth::AlreadySkipped;
        }

        slot.credential.errors += 1;
        let errors = slot.credential.errors;
        if errors < self.error_threshold {
            return CredentialHealth::Healthy { errors };
        }

        slot.credential.skipped = true;
        tracing::warn!(
            credential = %id,
            key = %mask_secret(&slot.credential.key),
            errors,
            "Credential reached error threshold, skipping for the rest of the run"
        );

        if slots.iter().all(|s| s.credential.skipped) {
            self.exhausted.store(true, Ordering::SeqCst);
            tracing::warn!("All credentials exhausted");
        }

        CredentialHealth::JustSkipped { errors }
    }

    /// Whether the credential has been skipped; unknown ids count as skipped
    pub fn is_skipped(&self, id: CredentialId) -> bool {
        self.lock().get(id.0).is_none_or(|s| s.credential.skipped)
    }

    /// Whether every credential is skipped
    pub fn all_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Safe number of concurrent workers
    ///
    /// `ceil(min(sum of usable rpm, max_rpm) * call_secs / 60)`, clamped to
    /// `[1, max_workers]`.
    pub fn max_concurrency(&self) -> usize {
        let rpm_sum: u64 = self
            .lock()
            .iter()
            .filter(|s| !s.credential.skipped)
            .map(|s| u64::from(s.credential.rpm))
            .sum();
        let effective_rpm = rpm_sum.min(u64::from(self.max_rpm));
        let secs = self.assumed_call_duration.as_secs_f64();
        let workers = (effective_rpm as f64 * secs / 60.0).ceil() as usize;
        workers.clamp(1, self.max_workers)
    }

    /// Number of credentials not yet skipped
    pub fn usable_count(&self) -> usize {
        self.lock().iter().filter(|s| !s.credential.skipped).count()
    }

    /// Total number of credentials in the pool
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the pool holds no credentials (never true for a constructed pool)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every credential's current state
    pub fn snapshot(&self) -> Vec<Credential> {
        self.lock().iter().map(|s| s.credential.clone()).collect()
    }
}

fn rpm_spacing(rpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(rpm.max(1)))
}
