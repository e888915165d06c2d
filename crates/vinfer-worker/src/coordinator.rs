//! Computation coordinator.
//!
//! Guarantees at most one in-flight computation per fingerprint. The first
//! caller that misses the cache creates a ticket and spawns the computation;
//! later callers for the same fingerprint subscribe to the ticket and receive
//! the same outcome.
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──► ticket(fp) ──► spawned task ──► compute ──► commit / mark_failed
//! caller C ─┘        ▲                                           │
//!                    └──────────── broadcast outcome ◄───────────┘
//! ```
//!
//! The computation runs in its own task, so a waiter that times out or is
//! dropped never cancels it. The ticket table lock is only held to look up,
//! insert or remove a ticket; computations for different fingerprints never
//! wait on each other except through the admission limit.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, warn, Instrument};
use vinfer_models::{Artifact, EntryStatus, ProcessingState, VideoFingerprint};
use vinfer_storage::CacheStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ComputationLogger;
use crate::metrics;

/// Outcome broadcast to every waiter on a ticket.
type Outcome = Result<Artifact, String>;

/// In-memory record of one in-flight computation.
struct Ticket {
    sender: broadcast::Sender<Outcome>,
    started_at: DateTime<Utc>,
    /// Set once the computation holds an admission permit.
    admitted: Arc<AtomicBool>,
}

/// Point-in-time view of an in-flight computation.
#[derive(Debug, Clone, Serialize)]
pub struct TicketSnapshot {
    pub fingerprint: VideoFingerprint,
    pub started_at: DateTime<Utc>,
    /// Callers currently waiting for the outcome
    pub waiters: usize,
    /// False while the computation is queued behind the admission limit
    pub running: bool,
}

/// How a non-blocking submission was handled.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Served from the cache.
    Ready(Artifact),
    /// A new computation was started.
    Started,
    /// Joined a computation that was already in flight.
    Joined,
}

/// Counters for monitoring coordinator behaviour.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CoordinatorStats {
    /// Calls to `get_or_compute` and `submit`
    pub requests: u64,
    /// Requests served from the cache store
    pub cache_hits: u64,
    /// Requests that joined an in-flight computation
    pub coalesced: u64,
    /// Compute functions actually invoked
    pub computations: u64,
    /// Computations that failed or panicked
    pub failures: u64,
    /// Waiters that gave up before the outcome arrived
    pub timeouts: u64,
    /// Store operations that failed and were worked around
    pub storage_errors: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    storage_errors: AtomicU64,
}

struct Inner {
    store: CacheStore,
    tickets: Mutex<HashMap<VideoFingerprint, Ticket>>,
    admission: Option<Arc<Semaphore>>,
    default_timeout: Duration,
    counters: Counters,
}

/// Deduplicates computations per fingerprint over a shared cache store.
///
/// Cheap to clone; clones share tickets and counters.
#[derive(Clone)]
pub struct ComputationCoordinator {
    inner: Arc<Inner>,
}

impl ComputationCoordinator {
    /// Create a coordinator.
    ///
    /// `max_concurrent` bounds how many computations run at once across all
    /// fingerprints; 0 means unlimited.
    pub fn new(store: CacheStore, default_timeout: Duration, max_concurrent: usize) -> Self {
        let admission = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self {
            inner: Arc::new(Inner {
                store,
                tickets: Mutex::new(HashMap::new()),
                admission,
                default_timeout,
                counters: Counters::default(),
            }),
        }
    }

    pub fn from_config(store: CacheStore, config: &WorkerConfig) -> Self {
        Self::new(
            store,
            config.waiter_timeout,
            config.max_concurrent_computations,
        )
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Return the cached artifact for `fingerprint`, computing it at most once.
    ///
    /// Waits up to the default timeout.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &VideoFingerprint,
        compute: F,
    ) -> WorkerResult<Artifact>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult<Artifact>> + Send + 'static,
    {
        self.get_or_compute_with_timeout(fingerprint, self.inner.default_timeout, compute)
            .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute) with a caller-chosen timeout.
    ///
    /// On timeout only this caller detaches; the computation keeps running and
    /// other waiters still receive its outcome.
    pub async fn get_or_compute_with_timeout<F, Fut>(
        &self,
        fingerprint: &VideoFingerprint,
        timeout: Duration,
        compute: F,
    ) -> WorkerResult<Artifact>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult<Artifact>> + Send + 'static,
    {
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(artifact) = self.cached(fingerprint).await {
            return Ok(artifact);
        }

        let (receiver, _) = self.join_or_start(fingerprint, compute).await;
        self.wait(fingerprint, receiver, timeout).await
    }

    /// Start or join a computation without waiting for it.
    pub async fn submit<F, Fut>(
        &self,
        fingerprint: &VideoFingerprint,
        compute: F,
    ) -> SubmitOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult<Artifact>> + Send + 'static,
    {
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(artifact) = self.cached(fingerprint).await {
            return SubmitOutcome::Ready(artifact);
        }

        let (_receiver, started) = self.join_or_start(fingerprint, compute).await;
        if started {
            SubmitOutcome::Started
        } else {
            SubmitOutcome::Joined
        }
    }

    /// What is currently known about a fingerprint.
    pub async fn state(&self, fingerprint: &VideoFingerprint) -> WorkerResult<ProcessingState> {
        if self.inner.tickets.lock().await.contains_key(fingerprint) {
            return Ok(ProcessingState::Pending);
        }

        let entry = match self.inner.store.lookup(fingerprint).await {
            Ok(entry) => entry,
            Err(e) if e.is_corruption() => None,
            Err(e) => return Err(e.into()),
        };

        Ok(match entry {
            Some(entry) if entry.is_hit() => ProcessingState::Ready,
            Some(entry) => match entry.status {
                EntryStatus::Failed => ProcessingState::Failed {
                    reason: entry
                        .failure_reason
                        .unwrap_or_else(|| "unknown failure".to_string()),
                },
                // Possibly computed by another process sharing the store.
                EntryStatus::Pending => ProcessingState::Pending,
                // Ready but written by an older format version.
                EntryStatus::Ready => ProcessingState::Missing,
            },
            None => ProcessingState::Missing,
        })
    }

    /// Snapshot of every in-flight computation, oldest first.
    pub async fn in_flight(&self) -> Vec<TicketSnapshot> {
        let tickets = self.inner.tickets.lock().await;
        let mut snapshots: Vec<_> = tickets
            .iter()
            .map(|(fingerprint, ticket)| TicketSnapshot {
                fingerprint: fingerprint.clone(),
                started_at: ticket.started_at,
                waiters: ticket.sender.receiver_count(),
                running: ticket.admitted.load(Ordering::Acquire),
            })
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.inner.counters;
        CoordinatorStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            computations: c.computations.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            storage_errors: c.storage_errors.load(Ordering::Relaxed),
        }
    }

    /// Cache lookup that degrades storage errors to a miss.
    async fn cached(&self, fingerprint: &VideoFingerprint) -> Option<Artifact> {
        match self.inner.store.load_ready(fingerprint).await {
            Ok(Some(artifact)) => {
                self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit();
                Some(artifact)
            }
            Ok(None) => {
                metrics::record_cache_miss();
                None
            }
            Err(e) => {
                self.inner.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_storage_error("lookup");
                warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Cache lookup failed, falling back to computation"
                );
                None
            }
        }
    }

    /// Subscribe to the ticket for `fingerprint`, creating it and spawning the
    /// computation if none exists. Returns whether a computation was started.
    async fn join_or_start<F, Fut>(
        &self,
        fingerprint: &VideoFingerprint,
        compute: F,
    ) -> (broadcast::Receiver<Outcome>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult<Artifact>> + Send + 'static,
    {
        let mut tickets = self.inner.tickets.lock().await;

        if let Some(ticket) = tickets.get(fingerprint) {
            let receiver = ticket.sender.subscribe();
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::record_coalesced();
            debug!(
                fingerprint = %fingerprint,
                waiters = ticket.sender.receiver_count(),
                "Joining in-flight computation"
            );
            return (receiver, false);
        }

        // One outcome per ticket, so a single slot is enough.
        let (sender, receiver) = broadcast::channel(1);
        let admitted = Arc::new(AtomicBool::new(false));
        tickets.insert(
            fingerprint.clone(),
            Ticket {
                sender: sender.clone(),
                started_at: Utc::now(),
                admitted: admitted.clone(),
            },
        );
        metrics::set_computations_in_flight(tickets.len());
        drop(tickets);

        let logger = ComputationLogger::new(fingerprint, "inference");
        let span = logger.create_span();
        let inner = self.inner.clone();
        let fingerprint = fingerprint.clone();
        tokio::spawn(
            async move {
                // The ticket is resolved even when a store call panics.
                let outcome = AssertUnwindSafe(inner.run(&fingerprint, &logger, admitted, compute))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                        let reason = format!(
                            "computation task panicked: {}",
                            panic_message(panic.as_ref())
                        );
                        logger.log_error(&reason);
                        Err(reason)
                    });
                inner.resolve(&fingerprint, sender, outcome).await;
            }
            .instrument(span),
        );

        (receiver, true)
    }

    async fn wait(
        &self,
        fingerprint: &VideoFingerprint,
        mut receiver: broadcast::Receiver<Outcome>,
        timeout: Duration,
    ) -> WorkerResult<Artifact> {
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Ok(Ok(artifact))) => Ok(artifact),
            Ok(Ok(Err(reason))) => Err(WorkerError::Computation(reason)),
            Ok(Err(e)) => Err(WorkerError::computation(format!(
                "computation ended without an outcome: {}",
                e
            ))),
            Err(_) => {
                self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_waiter_timeout();
                warn!(
                    fingerprint = %fingerprint,
                    timeout_secs = timeout.as_secs_f64(),
                    "Waiter timed out; computation continues"
                );
                Err(WorkerError::Timeout(timeout))
            }
        }
    }
}

impl Inner {
    /// Body of the spawned computation task.
    async fn run<F, Fut>(
        &self,
        fingerprint: &VideoFingerprint,
        logger: &ComputationLogger,
        admitted: Arc<AtomicBool>,
        compute: F,
    ) -> Outcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult<Artifact>> + Send + 'static,
    {
        let _permit = match &self.admission {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return Err("admission control closed".to_string()),
            },
            None => None,
        };
        admitted.store(true, Ordering::Release);

        // Double-check: another process sharing the store may have committed
        // while this one was queued.
        match self.store.load_ready(fingerprint).await {
            Ok(Some(artifact)) => {
                logger.log_completion("already committed to cache, skipping computation");
                return Ok(artifact);
            }
            Ok(None) => {}
            Err(e) => {
                self.record_storage_error("recheck", fingerprint, &e);
            }
        }

        if let Err(e) = self.store.mark_pending(fingerprint).await {
            self.record_storage_error("mark_pending", fingerprint, &e);
        }

        logger.log_start("invoking pipeline");
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = AssertUnwindSafe(async move { compute().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(WorkerError::computation(format!(
                    "computation panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        let elapsed = started.elapsed();

        match result {
            Ok(artifact) => {
                metrics::record_computation("ready", elapsed.as_secs_f64());
                // Waiters still get the artifact if it cannot be persisted;
                // the next request recomputes.
                match AssertUnwindSafe(self.store.commit(fingerprint, &artifact))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        self.record_storage_error("commit", fingerprint, &e);
                        logger.log_warning("artifact could not be persisted");
                    }
                    Err(panic) => {
                        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
                        metrics::record_storage_error("commit");
                        logger.log_warning(&format!(
                            "artifact could not be persisted, store panicked: {}",
                            panic_message(panic.as_ref())
                        ));
                    }
                }
                logger.log_completion(&format!(
                    "{} bytes in {:.2}s",
                    artifact.len(),
                    elapsed.as_secs_f64()
                ));
                Ok(artifact)
            }
            Err(e) => {
                let reason = match e {
                    WorkerError::Computation(reason) => reason,
                    other => other.to_string(),
                };
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_computation("failed", elapsed.as_secs_f64());
                logger.log_error(&reason);
                if let Err(e) = self.store.mark_failed(fingerprint, &reason).await {
                    self.record_storage_error("mark_failed", fingerprint, &e);
                }
                Err(reason)
            }
        }
    }

    /// Remove the ticket and hand the outcome to every waiter.
    async fn resolve(
        &self,
        fingerprint: &VideoFingerprint,
        sender: broadcast::Sender<Outcome>,
        outcome: Outcome,
    ) {
        {
            let mut tickets = self.tickets.lock().await;
            tickets.remove(fingerprint);
            metrics::set_computations_in_flight(tickets.len());
        }

        let waiters = sender.receiver_count();
        // No receivers left is fine: every waiter may have timed out.
        let _ = sender.send(outcome);
        debug!(
            fingerprint = %fingerprint,
            waiters = waiters,
            "Computation resolved"
        );
    }

    fn record_storage_error(
        &self,
        operation: &str,
        fingerprint: &VideoFingerprint,
        error: &vinfer_storage::StorageError,
    ) {
        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_storage_error(operation);
        warn!(
            fingerprint = %fingerprint,
            operation = operation,
            error = %error,
            "Cache store operation failed"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl std::fmt::Debug for ComputationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationCoordinator")
            .field("store", &self.inner.store)
            .field("default_timeout", &self.inner.default_timeout)
            .field(
                "max_concurrent",
                &self.inner.admission.as_ref().map(|s| s.available_permits()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fp(byte: u8) -> VideoFingerprint {
        VideoFingerprint::from_digest(&[byte; 32])
    }

    fn explode() -> WorkerResult<Artifact> {
        panic!("model exploded")
    }

    fn coordinator() -> ComputationCoordinator {
        ComputationCoordinator::new(CacheStore::in_memory(), Duration::from_secs(5), 0)
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let artifact = coordinator
                .get_or_compute(&fp(1), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Artifact::new(b"result".to_vec()))
                })
                .await
                .unwrap();
            assert_eq!(artifact.data(), b"result");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.computations, 1);
    }

    #[tokio::test]
    async fn test_failure_marks_entry_failed() {
        let coordinator = coordinator();
        let err = coordinator
            .get_or_compute(&fp(2), || async { Err(WorkerError::computation("bad frame")) })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Computation(ref r) if r == "bad frame"));
        assert_eq!(
            coordinator.state(&fp(2)).await.unwrap(),
            ProcessingState::Failed {
                reason: "bad frame".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_computation_error() {
        let coordinator = coordinator();
        let err = coordinator
            .get_or_compute(&fp(3), || async { explode() })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("model exploded"), "{}", err);
        assert!(coordinator.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let coordinator = coordinator();
        assert_eq!(coordinator.state(&fp(4)).await.unwrap(), ProcessingState::Missing);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let outcome = coordinator
            .submit(&fp(4), move || async move {
                let _ = release_rx.await;
                Ok(Artifact::new(b"done".to_vec()))
            })
            .await;
        assert!(matches!(outcome, SubmitOutcome::Started));
        assert_eq!(coordinator.state(&fp(4)).await.unwrap(), ProcessingState::Pending);
        assert_eq!(coordinator.in_flight().await.len(), 1);

        let joined = coordinator
            .submit(&fp(4), || async { Ok(Artifact::new(b"unused".to_vec())) })
            .await;
        assert!(matches!(joined, SubmitOutcome::Joined));

        release_tx.send(()).unwrap();
        let artifact = coordinator
            .get_or_compute(&fp(4), || async { Ok(Artifact::new(b"unused".to_vec())) })
            .await
            .unwrap();
        assert_eq!(artifact.data(), b"done");
        assert_eq!(coordinator.state(&fp(4)).await.unwrap(), ProcessingState::Ready);
    }

    #[test]
    fn test_panic_message_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
