//! Mock exam backend.
//!
//! Serves the three backend surfaces the exam client talks to:
//!
//! - `GET /sessions/join_session/{exam_id}` and
//!   `GET /sessions/supervisor_join_session/{exam_id}` (bearer token required)
//! - `GET /sessions/{exam_id}/examinees` (`session_id` header required)
//! - `GET /ws/events?exam_id=…` event WebSocket
//!
//! Tests push events to every connected event client with [`MockBackend::push`]
//! and read back what clients sent with [`MockBackend::commands`].

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use signaling_protocol::codec::{decode_command, encode_event};
use signaling_protocol::{BackendCommand, BackendEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize)]
struct Examinee {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    exam_id: Option<String>,
}

struct BackendState {
    reject_joins: AtomicBool,
    joins: AtomicUsize,
    examinees: Mutex<HashMap<String, Vec<Examinee>>>,
    events: broadcast::Sender<String>,
    event_clients: AtomicUsize,
    event_exam_ids: Mutex<Vec<String>>,
    commands: Mutex<Vec<BackendCommand>>,
}

/// A running mock backend on a random port.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    _handle: JoinHandle<()>,
}

impl MockBackend {
    /// Start the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let (events, _) = broadcast::channel(64);
        let state = Arc::new(BackendState {
            reject_joins: AtomicBool::new(false),
            joins: AtomicUsize::new(0),
            examinees: Mutex::new(HashMap::new()),
            events,
            event_clients: AtomicUsize::new(0),
            event_exam_ids: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/sessions/join_session/:exam_id", get(join_examinee))
            .route(
                "/sessions/supervisor_join_session/:exam_id",
                get(join_supervisor),
            )
            .route("/sessions/:exam_id/examinees", get(list_examinees))
            .route("/ws/events", get(events_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind mock backend: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Mock backend error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// HTTP base URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Event WebSocket URL (without the `exam_id` query).
    pub fn events_url(&self) -> String {
        format!("ws://{}/ws/events", self.addr)
    }

    /// Answer every join with 403.
    pub fn reject_joins(&self) {
        self.state.reject_joins.store(true, Ordering::SeqCst);
    }

    /// Successful and rejected join calls so far.
    pub fn join_count(&self) -> usize {
        self.state.joins.load(Ordering::SeqCst)
    }

    /// Set the connected examinees reported for `exam_id`.
    pub fn set_examinees(&self, exam_id: &str, ids: &[&str]) {
        let examinees = ids
            .iter()
            .map(|id| Examinee {
                id: (*id).to_string(),
                name: format!("Examinee {id}"),
            })
            .collect();
        self.state
            .examinees
            .lock()
            .unwrap()
            .insert(exam_id.to_string(), examinees);
    }

    /// Send `event` to every connected event client.
    pub fn push(&self, event: &BackendEvent) {
        let text = encode_event(event).expect("fixture events encode");
        // No receivers is fine; the event is simply dropped
        let _ = self.state.events.send(text);
    }

    /// Currently connected event clients.
    pub fn event_client_count(&self) -> usize {
        self.state.event_clients.load(Ordering::SeqCst)
    }

    /// `exam_id` query values of every event connection so far.
    pub fn event_exam_ids(&self) -> Vec<String> {
        self.state.event_exam_ids.lock().unwrap().clone()
    }

    /// Commands received from event clients, in arrival order.
    pub fn commands(&self) -> Vec<BackendCommand> {
        self.state.commands.lock().unwrap().clone()
    }

    /// Wait until `count` event clients are connected, failing after five seconds.
    pub async fn wait_for_event_clients(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.event_client_count() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} event clients, have {}",
                self.event_client_count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `count` commands arrived, failing after five seconds.
    pub async fn wait_for_commands(&self, count: usize) -> Vec<BackendCommand> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let commands = self.commands();
            if commands.len() >= count {
                return commands;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} commands, have {}",
                commands.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

fn has_bearer(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer ") && v.len() > "Bearer ".len())
}

fn join(state: &BackendState, headers: &HeaderMap, exam_id: &str, message: &str) -> Response {
    state.joins.fetch_add(1, Ordering::SeqCst);

    if !has_bearer(headers) {
        return (StatusCode::UNAUTHORIZED, "missing credential").into_response();
    }
    if state.reject_joins.load(Ordering::SeqCst) {
        return (StatusCode::FORBIDDEN, "not enrolled in this exam").into_response();
    }

    Json(serde_json::json!({
        "message": message,
        "session_id": format!("session-{exam_id}-{}", uuid::Uuid::new_v4()),
    }))
    .into_response()
}

async fn join_examinee(
    State(state): State<Arc<BackendState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    join(&state, &headers, &exam_id, "Joined exam session")
}

async fn join_supervisor(
    State(state): State<Arc<BackendState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    join(&state, &headers, &exam_id, "Supervisor joined exam session")
}

async fn list_examinees(
    State(state): State<Arc<BackendState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !headers.contains_key("session_id") {
        return (StatusCode::UNAUTHORIZED, "missing session").into_response();
    }

    let examinees = state
        .examinees
        .lock()
        .unwrap()
        .get(&exam_id)
        .cloned()
        .unwrap_or_default();
    Json(examinees).into_response()
}

async fn events_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<EventsQuery>,
    State(state): State<Arc<BackendState>>,
) -> Response {
    if let Some(exam_id) = query.exam_id {
        state.event_exam_ids.lock().unwrap().push(exam_id);
    }
    ws.on_upgrade(move |socket| event_socket(socket, state))
}

async fn event_socket(socket: WebSocket, state: Arc<BackendState>) {
    let mut events = state.events.subscribe();
    state.event_clients.fetch_add(1, Ordering::SeqCst);

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(text) = event else { break };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(command) = decode_command(&text) {
                        state.commands.lock().unwrap().push(command);
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.event_clients.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_spawns() -> Result<(), anyhow::Error> {
        let backend = MockBackend::spawn().await?;
        assert!(backend.url().starts_with("http://127.0.0.1:"));
        assert!(backend.events_url().ends_with("/ws/events"));
        assert_eq!(backend.event_client_count(), 0);
        assert_eq!(backend.join_count(), 0);
        Ok(())
    }
}
