//! Worker pool - fixed set of workers with round-robin assignment.
//!
//! The pool is created once at startup. Every new connection session asks
//! for the next worker; the cursor advances under a mutex so N sequential
//! calls over P workers select each worker `floor(N/P)` or `ceil(N/P)` times
//! in rotation order.

use crate::config::ListenConfig;
use crate::engine::{Router, Worker, WorkerDied};
use crate::errors::MediaServerError;
use crate::observability::metrics;
use common::types::WorkerId;
use serde::Serialize;
use signaling_protocol::rtp::RtpCodecCapability;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Point-in-time status of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub alive: bool,
    pub assignments: u64,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    assignments: Vec<AtomicU64>,
    cursor: Mutex<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    died_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerDied>>>,
    cancel_token: CancellationToken,
}

impl WorkerPool {
    /// Start `count` workers, each with one router built from `media_codecs`.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::PoolInit`] if `count` is zero or any
    /// router cannot be built. Workers already started are stopped.
    pub fn initialize(
        count: usize,
        media_codecs: &[RtpCodecCapability],
        listen: &ListenConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, MediaServerError> {
        if count == 0 {
            return Err(MediaServerError::PoolInit(
                "worker count must be at least 1".to_string(),
            ));
        }

        let (died_tx, died_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);

        for index in 0..count {
            let worker_id = u32::try_from(index)
                .map(WorkerId)
                .map_err(|_| MediaServerError::PoolInit("too many workers".to_string()))?;

            let router = match Router::new(worker_id, media_codecs, listen.clone()) {
                Ok(router) => router,
                Err(e) => {
                    cancel_token.cancel();
                    return Err(e);
                }
            };

            let (worker, task) =
                Worker::spawn(worker_id, router, died_tx.clone(), cancel_token.child_token());
            workers.push(worker);
            tasks.push(task);
        }

        info!(target: "media.pool", workers = count, "Worker pool initialized");

        Ok(Self {
            assignments: (0..count).map(|_| AtomicU64::new(0)).collect(),
            workers,
            cursor: Mutex::new(0),
            tasks: Mutex::new(tasks),
            died_rx: Mutex::new(Some(died_rx)),
            cancel_token,
        })
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Select the next worker in rotation.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::Internal`] if the pool holds no workers.
    pub async fn next(&self) -> Result<&Worker, MediaServerError> {
        let index = {
            let mut cursor = self.cursor.lock().await;
            let index = *cursor;
            *cursor = (index + 1) % self.workers.len().max(1);
            index
        };

        let worker = self
            .workers
            .get(index)
            .ok_or_else(|| MediaServerError::Internal("worker pool is empty".to_string()))?;

        if let Some(count) = self.assignments.get(index) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_worker_assignment(&worker.id().to_string());

        Ok(worker)
    }

    /// Look up a worker by id.
    #[must_use]
    pub fn worker(&self, worker_id: WorkerId) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id() == worker_id)
    }

    /// Per-worker liveness and assignment counts.
    #[must_use]
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .zip(&self.assignments)
            .map(|(worker, assignments)| WorkerStatus {
                worker_id: worker.id(),
                alive: worker.is_alive(),
                assignments: assignments.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Whether every worker is running.
    #[must_use]
    pub fn all_alive(&self) -> bool {
        self.workers.iter().all(Worker::is_alive)
    }

    /// Watch for worker deaths.
    ///
    /// On the first death the monitor logs at error level, waits `grace`,
    /// then calls `on_fatal` with a [`MediaServerError::WorkerFault`]. The
    /// process is expected to exit from there.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::Internal`] if a monitor is already running.
    pub async fn spawn_fault_monitor<F>(
        &self,
        grace: Duration,
        on_fatal: F,
    ) -> Result<JoinHandle<()>, MediaServerError>
    where
        F: FnOnce(MediaServerError) + Send + 'static,
    {
        let mut died_rx = self.died_rx.lock().await.take().ok_or_else(|| {
            MediaServerError::Internal("fault monitor already running".to_string())
        })?;
        let cancel_token = self.cancel_token.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                died = died_rx.recv() => {
                    let Some(died) = died else {
                        return;
                    };
                    error!(
                        target: "media.pool",
                        worker_id = %died.worker_id,
                        reason = %died.reason,
                        grace_ms = grace.as_millis(),
                        "Media worker died, exiting after grace period"
                    );
                    metrics::record_worker_death(&died.worker_id.to_string());
                    tokio::time::sleep(grace).await;
                    on_fatal(died.into());
                }
            }
        }))
    }

    /// Stop every worker and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        self.cancel_token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(target: "media.pool", error = %e, "Worker task ended abnormally");
            }
        }

        info!(target: "media.pool", "Worker pool shut down");
    }
}

/// Shared pool handle.
pub type SharedPool = Arc<WorkerPool>;
