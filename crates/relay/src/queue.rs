//! Bounded hand-off between the webhook and the relay workers.
//!
//! The webhook admits a whole batch or nothing: admission takes one permit per
//! notification from a semaphore sized to the queue capacity, and a worker
//! gives the permit back once that notification is fully processed. Jobs sit
//! on an unbounded channel because the semaphore already bounds them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::{
        sync::{Mutex, Semaphore, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use teamsmirror_graph::{Notification, Result};

#[cfg(feature = "metrics")]
use crate::definitions::notifications as names;
use crate::processor::Outcome;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs one notification to completion.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    async fn handle(&self, notification: &Notification) -> Result<Outcome>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub workers: usize,
    pub capacity: usize,
    pub task_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_QUEUE_CAPACITY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    /// Not enough free slots for the whole batch.
    #[error("relay queue full: {requested} requested, {available} available")]
    Full { requested: usize, available: usize },

    /// All workers have exited.
    #[error("relay queue closed")]
    Closed,
}

/// Per-outcome counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    invalid_payloads: AtomicU64,
    relayed: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub invalid_payloads: u64,
    pub relayed: u64,
    pub filtered: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl StatsSnapshot {
    /// Jobs that reached a final state.
    pub fn completed(&self) -> u64 {
        self.relayed + self.filtered + self.failed + self.timed_out
    }
}

impl QueueStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            invalid_payloads: self.invalid_payloads.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    pub fn record_invalid_payload(&self) {
        self.invalid_payloads.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(names::INVALID_PAYLOADS_TOTAL).increment(1);
    }

    fn record_accepted(&self, n: u64) {
        self.accepted.fetch_add(n, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(names::ACCEPTED_TOTAL).increment(n);
    }

    fn record_rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(names::REJECTED_TOTAL).increment(n);
    }

    fn record_outcome(&self, outcome: &Outcome) {
        if *outcome == Outcome::Relayed {
            self.relayed.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!(names::RELAYED_TOTAL).increment(1);
        } else if outcome.is_filtered() {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!(names::FILTERED_TOTAL).increment(1);
        } else {
            self.record_failed();
        }
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(names::FAILED_TOTAL).increment(1);
    }

    fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!(names::TIMED_OUT_TOTAL).increment(1);
    }
}

/// Bounded relay queue drained by a fixed pool of workers.
pub struct RelayQueue {
    tx: mpsc::UnboundedSender<Notification>,
    admission: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<QueueStats>,
    workers: Vec<JoinHandle<()>>,
}

impl RelayQueue {
    /// Spawn `options.workers` workers feeding `handler`. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(handler: Arc<dyn NotificationHandler>, options: QueueOptions) -> Self {
        let capacity = options.capacity.max(1);
        let worker_count = options.workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let admission = Arc::new(Semaphore::new(capacity));
        let stats = Arc::new(QueueStats::default());

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&handler),
                    Arc::clone(&admission),
                    Arc::clone(&stats),
                    options.task_timeout,
                ))
            })
            .collect();

        info!(
            workers = worker_count,
            capacity,
            timeout_secs = options.task_timeout.as_secs(),
            "relay queue started"
        );
        Self {
            tx,
            admission,
            capacity,
            stats,
            workers,
        }
    }

    /// Admit every notification of a batch, or none of them.
    ///
    /// Never waits: a full queue is reported immediately.
    pub fn admit(&self, batch: Vec<Notification>) -> std::result::Result<usize, AdmitError> {
        let requested = batch.len();
        if requested == 0 {
            return Ok(0);
        }

        let available = self.admission.available_permits();
        let permit = u32::try_from(requested)
            .ok()
            .and_then(|n| Arc::clone(&self.admission).try_acquire_many_owned(n).ok());
        let Some(permit) = permit else {
            self.stats.record_rejected(requested as u64);
            return Err(AdmitError::Full {
                requested,
                available,
            });
        };
        // Workers hand permits back one by one as jobs finish.
        permit.forget();

        let mut sent = 0;
        for notification in batch {
            if self.tx.send(notification).is_err() {
                self.admission.add_permits(requested - sent);
                error!("relay workers are gone, dropping batch");
                return Err(AdmitError::Closed);
            }
            sent += 1;
        }

        self.stats.record_accepted(requested as u64);
        debug!(count = requested, "notifications queued");
        Ok(requested)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn record_invalid_payload(&self) {
        self.stats.record_invalid_payload();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admitted notifications that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.admission.available_permits())
    }

    /// Wait until every admitted notification has finished.
    pub async fn idle(&self) {
        let Ok(all) = u32::try_from(self.capacity) else {
            return;
        };
        if let Ok(permits) = self.admission.acquire_many(all).await {
            drop(permits);
        }
    }
}

impl Drop for RelayQueue {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Notification>>>,
    handler: Arc<dyn NotificationHandler>,
    admission: Arc<Semaphore>,
    stats: Arc<QueueStats>,
    task_timeout: Duration,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(notification) = next else {
            debug!(worker_id, "relay worker stopping");
            break;
        };

        let subscription_id = notification.subscription_id.clone();
        let handler = Arc::clone(&handler);
        let mut task = tokio::spawn(async move { handler.handle(&notification).await });

        match tokio::time::timeout(task_timeout, &mut task).await {
            Ok(Ok(Ok(outcome))) => {
                debug!(
                    worker_id,
                    subscription_id = %subscription_id,
                    ?outcome,
                    "notification processed"
                );
                stats.record_outcome(&outcome);
            },
            Ok(Ok(Err(e))) => {
                warn!(
                    worker_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "notification processing failed"
                );
                stats.record_failed();
            },
            Ok(Err(join_err)) => {
                error!(
                    worker_id,
                    subscription_id = %subscription_id,
                    error = %join_err,
                    "notification task panicked"
                );
                stats.record_failed();
            },
            Err(_) => {
                task.abort();
                warn!(
                    worker_id,
                    subscription_id = %subscription_id,
                    timeout_secs = task_timeout.as_secs(),
                    "notification processing timed out"
                );
                stats.record_timed_out();
            },
        }

        admission.add_permits(1);
    }
}
