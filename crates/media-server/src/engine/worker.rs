//! Worker - isolated media-processing unit hosting one router.
//!
//! Each worker runs as its own task that waits for shutdown or for a fault
//! report from the engine. A fault is unrecoverable: the worker announces its
//! death to the pool and stops.

use super::router::Router;
use crate::errors::MediaServerError;
use common::types::WorkerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

/// Notification sent to the pool when a worker dies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDied {
    pub worker_id: WorkerId,
    pub reason: String,
}

impl From<WorkerDied> for MediaServerError {
    fn from(died: WorkerDied) -> Self {
        MediaServerError::WorkerFault {
            worker_id: died.worker_id,
            reason: died.reason,
        }
    }
}

/// Handle to a running worker.
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    router: Arc<Router>,
    fault_tx: mpsc::Sender<String>,
    cancel_token: CancellationToken,
}

impl Worker {
    /// Spawn the worker task.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        id: WorkerId,
        router: Router,
        died_tx: mpsc::UnboundedSender<WorkerDied>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (fault_tx, fault_rx) = mpsc::channel(1);

        let task = tokio::spawn(run(id, fault_rx, died_tx, cancel_token.clone()));

        let worker = Self {
            id,
            router: Arc::new(router),
            fault_tx,
            cancel_token,
        };

        (worker, task)
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Whether the worker task is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.fault_tx.is_closed() && !self.cancel_token.is_cancelled()
    }

    /// Inject a fatal engine fault on this worker.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::Internal`] if the worker already stopped.
    #[cfg(test)]
    pub(crate) async fn report_fault(&self, reason: impl Into<String>) -> Result<(), MediaServerError> {
        self.fault_tx
            .send(reason.into())
            .await
            .map_err(|e| MediaServerError::Internal(format!("worker {} not running: {e}", self.id)))
    }

    /// Stop the worker task.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

#[instrument(skip_all, name = "media.worker", fields(worker_id = %id))]
async fn run(
    id: WorkerId,
    mut fault_rx: mpsc::Receiver<String>,
    died_tx: mpsc::UnboundedSender<WorkerDied>,
    cancel_token: CancellationToken,
) {
    debug!(target: "media.worker", worker_id = %id, "Worker started");

    tokio::select! {
        () = cancel_token.cancelled() => {
            debug!(target: "media.worker", worker_id = %id, "Worker stopped");
        }
        fault = fault_rx.recv() => {
            let reason = fault.unwrap_or_else(|| "fault channel closed".to_string());
            error!(
                target: "media.worker",
                worker_id = %id,
                reason = %reason,
                "Worker died"
            );
            let _ = died_tx.send(WorkerDied { worker_id: id, reason });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use crate::engine::default_media_codecs;
    use std::time::Duration;

    fn spawn_worker(
        died_tx: mpsc::UnboundedSender<WorkerDied>,
    ) -> (Worker, JoinHandle<()>) {
        let router =
            Router::new(WorkerId(7), &default_media_codecs(), ListenConfig::default()).unwrap();
        Worker::spawn(WorkerId(7), router, died_tx, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_fault_is_reported() {
        let (died_tx, mut died_rx) = mpsc::unbounded_channel();
        let (worker, task) = spawn_worker(died_tx);
        assert!(worker.is_alive());
        assert_eq!(worker.router().worker_id(), WorkerId(7));

        worker.report_fault("segfault in codec").await.unwrap();

        let died = tokio::time::timeout(Duration::from_secs(1), died_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(died.worker_id, WorkerId(7));
        assert_eq!(died.reason, "segfault in codec");
        assert_eq!(
            MediaServerError::from(died).to_string(),
            "Worker worker-7 fault: segfault in codec"
        );

        task.await.unwrap();
        assert!(!worker.is_alive());
        assert!(worker.report_fault("again").await.is_err());
    }

    #[tokio::test]
    async fn test_stop_does_not_report_death() {
        let (died_tx, mut died_rx) = mpsc::unbounded_channel();
        let (worker, task) = spawn_worker(died_tx);

        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(died_rx.try_recv().is_err());
        assert!(!worker.is_alive());
    }
}
