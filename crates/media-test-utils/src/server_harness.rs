//! Test server harness for E2E testing
//!
//! Provides `TestMediaServer` for spawning a real signaling server in tests.

use media_server::actors::ActorMetrics;
use media_server::config::ListenConfig;
use media_server::engine::{default_media_codecs, ProducerDirectory};
use media_server::observability::{status_router, StatusState};
use media_server::pool::WorkerPool;
use media_server::signaling::{signaling_router, SignalingState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the media server in E2E tests.
///
/// Serves `GET /signal` and `GET /status` on one random port.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_status() -> anyhow::Result<()> {
///     let server = TestMediaServer::spawn().await?;
///     assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
///     Ok(())
/// }
/// ```
pub struct TestMediaServer {
    addr: SocketAddr,
    state: Arc<SignalingState>,
    actor_metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestMediaServer {
    /// Spawn a server with two workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot start or the port cannot be bound.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_workers(2).await
    }

    /// Spawn a server with `worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot start or the port cannot be bound.
    pub async fn spawn_with_workers(worker_count: usize) -> Result<Self, anyhow::Error> {
        let cancel_token = CancellationToken::new();

        let pool = WorkerPool::initialize(
            worker_count,
            &default_media_codecs(),
            &ListenConfig::default(),
            cancel_token.child_token(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to start worker pool: {}", e))?;
        let pool = Arc::new(pool);

        let actor_metrics = ActorMetrics::new();
        let state = SignalingState::new(
            Arc::clone(&pool),
            Arc::clone(&actor_metrics),
            cancel_token.child_token(),
        );

        let app = signaling_router(Arc::clone(&state)).merge(status_router(Arc::new(
            StatusState {
                pool,
                actor_metrics: Arc::clone(&actor_metrics),
            },
        )));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_token = cancel_token.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            actor_metrics,
            cancel_token,
            _handle: handle,
        })
    }

    /// Base HTTP URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/signal", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.state.pool
    }

    pub fn directory(&self) -> &Arc<ProducerDirectory> {
        &self.state.directory
    }

    /// Producers currently registered across all sessions.
    pub async fn live_producer_count(&self) -> usize {
        self.state.directory.len().await
    }

    /// Connections whose actor is still running.
    pub fn active_connections(&self) -> usize {
        self.actor_metrics.connection_count()
    }

    /// Poll until `condition` holds, failing the test after five seconds.
    ///
    /// Session teardown runs after the socket closes, so tests observing it
    /// need to wait.
    pub async fn wait_until<F, Fut>(&self, mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !condition().await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within 5s"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestMediaServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self._handle.abort();
    }
}
