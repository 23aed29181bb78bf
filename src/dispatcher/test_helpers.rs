//! In-memory collaborators for dispatcher tests.

use crate::condenser::RemoteCondenser;
use crate::config::{Config, CredentialConfig, DispatchConfig};
use crate::credential_pool::{CredentialLease, CredentialPool};
use crate::error::{CondenseError, StoreError};
use crate::store::{DocumentStore, StoreResult};
use crate::types::{CredentialId, DocumentRef};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Dispatcher;

/// Prose long enough to require remote condensation (single line, not a listing).
pub(crate) fn long_text(tag: &str) -> String {
    format!("{tag} {}", "他推开门，看见院子里站着一个陌生人。".repeat(20))
}

/// Dispatch settings with pacing disabled so tests never sleep on RPM slots.
pub(crate) fn test_dispatch_config(error_threshold: u32) -> DispatchConfig {
    DispatchConfig {
        error_threshold,
        pace_requests: false,
        ..DispatchConfig::default()
    }
}

/// Pool with one credential per entry of `rpms`.
pub(crate) fn test_pool(rpms: &[u32], error_threshold: u32) -> Arc<CredentialPool> {
    let config = Config {
        credentials: rpms
            .iter()
            .enumerate()
            .map(|(i, rpm)| CredentialConfig::new(format!("test-key-{i:04}")).with_rpm(*rpm))
            .collect(),
        dispatch: test_dispatch_config(error_threshold),
        ..Config::default()
    };
    Arc::new(CredentialPool::new(&config).unwrap())
}

/// Pool that reserves `60 / rpm` second pacing slots per credential.
pub(crate) fn paced_pool(rpms: &[u32], error_threshold: u32) -> Arc<CredentialPool> {
    let config = Config {
        credentials: rpms
            .iter()
            .enumerate()
            .map(|(i, rpm)| CredentialConfig::new(format!("test-key-{i:04}")).with_rpm(*rpm))
            .collect(),
        dispatch: DispatchConfig {
            pace_requests: true,
            ..test_dispatch_config(error_threshold)
        },
        ..Config::default()
    };
    Arc::new(CredentialPool::new(&config).unwrap())
}

pub(crate) fn test_dispatcher(
    pool: Arc<CredentialPool>,
    store: Arc<MemoryStore>,
    condenser: Arc<ScriptedCondenser>,
    error_threshold: u32,
) -> Dispatcher {
    Dispatcher::new(pool, store, condenser, test_dispatch_config(error_threshold))
}

/// Document store backed by hash maps.
#[derive(Default)]
pub(crate) struct MemoryStore {
    sources: Mutex<HashMap<DocumentRef, String>>,
    outputs: Mutex<HashMap<DocumentRef, String>>,
    cache: Mutex<HashMap<String, String>>,
    unreadable: Mutex<HashSet<DocumentRef>>,
    panicking: Mutex<HashSet<DocumentRef>>,
    persist_calls: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_source(&self, name: &str, content: &str) -> DocumentRef {
        let doc = DocumentRef::from(name);
        self.sources
            .lock()
            .unwrap()
            .insert(doc.clone(), content.to_string());
        doc
    }

    /// Add `count` long documents named `doc_00.txt`, `doc_01.txt`, ...
    pub(crate) fn add_long_sources(&self, count: usize) -> Vec<DocumentRef> {
        (0..count)
            .map(|i| {
                let name = format!("doc_{i:02}.txt");
                self.add_source(&name, &long_text(&name))
            })
            .collect()
    }

    pub(crate) fn set_output(&self, doc: &DocumentRef, content: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(doc.clone(), content.to_string());
    }

    pub(crate) fn output(&self, doc: &DocumentRef) -> Option<String> {
        self.outputs.lock().unwrap().get(doc).cloned()
    }

    pub(crate) fn seed_cache(&self, content: &str, result: &str) {
        self.cache
            .lock()
            .unwrap()
            .insert(content.to_string(), result.to_string());
    }

    pub(crate) fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub(crate) fn mark_unreadable(&self, doc: &DocumentRef) {
        self.unreadable.lock().unwrap().insert(doc.clone());
    }

    pub(crate) fn mark_panicking(&self, doc: &DocumentRef) {
        self.panicking.lock().unwrap().insert(doc.clone());
    }

    pub(crate) fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, doc: &DocumentRef) -> StoreResult<String> {
        if self.panicking.lock().unwrap().contains(doc) {
            panic!("simulated fault reading {doc}");
        }
        if self.unreadable.lock().unwrap().contains(doc) {
            return Err(StoreError::Read {
                path: doc.path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        self.sources
            .lock()
            .unwrap()
            .get(doc)
            .cloned()
            .ok_or_else(|| StoreError::Read {
                path: doc.path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
    }

    async fn existing_output(&self, doc: &DocumentRef) -> StoreResult<Option<String>> {
        Ok(self.output(doc))
    }

    async fn discard_output(&self, doc: &DocumentRef) -> StoreResult<()> {
        self.outputs.lock().unwrap().remove(doc);
        Ok(())
    }

    async fn persist(&self, doc: &DocumentRef, content: &str) -> StoreResult<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.set_output(doc, content);
        Ok(())
    }

    async fn cached_result(&self, _doc: &DocumentRef, content: &str) -> StoreResult<Option<String>> {
        Ok(self.cache.lock().unwrap().get(content).cloned())
    }

    async fn write_cache(&self, _doc: &DocumentRef, original: &str, result: &str) -> StoreResult<()> {
        self.seed_cache(original, result);
        Ok(())
    }
}

type Behavior = dyn Fn(&CredentialLease, &str) -> Result<String, CondenseError> + Send + Sync;

/// Condenser whose answer is decided by a closure over the lease and content.
pub(crate) struct ScriptedCondenser {
    behavior: Box<Behavior>,
    delay: Duration,
    calls: Mutex<Vec<(CredentialId, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedCondenser {
    pub(crate) fn new(
        behavior: impl Fn(&CredentialLease, &str) -> Result<String, CondenseError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            behavior: Box::new(behavior),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Returns a fixed 400-character summary for every call.
    pub(crate) fn succeeding() -> Arc<Self> {
        Arc::new(Self::new(|_, _| Ok("摘".repeat(400))))
    }

    /// Fails every call.
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self::new(|_, _| {
            Err(CondenseError::Transport("connection reset".to_string()))
        }))
    }

    /// Fails every call made with one of `ids`, succeeds otherwise.
    pub(crate) fn failing_for(ids: &[usize]) -> Arc<Self> {
        let ids: Vec<usize> = ids.to_vec();
        Arc::new(Self::new(move |lease, _| {
            if ids.contains(&lease.id.get()) {
                Err(CondenseError::RateLimited("429".to_string()))
            } else {
                Ok("摘".repeat(400))
            }
        }))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<(CredentialId, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Credentials used for calls whose content starts with `prefix`.
    pub(crate) fn credentials_for(&self, prefix: &str) -> Vec<CredentialId> {
        self.calls()
            .into_iter()
            .filter(|(_, content)| content.starts_with(prefix))
            .map(|(id, _)| id)
            .collect()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteCondenser for ScriptedCondenser {
    async fn condense(&self, content: &str, lease: &CredentialLease) -> Result<String, CondenseError> {
        self.calls
            .lock()
            .unwrap()
            .push((lease.id, content.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.behavior)(lease, content)
    }
}
