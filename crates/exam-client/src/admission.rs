//! Session admission against the exam backend.
//!
//! An examinee joins through `GET /sessions/join_session/{exam_id}`, a
//! proctor through `GET /sessions/supervisor_join_session/{exam_id}`. Both
//! answer `{"session_id": "…"}`; the id is then sent as a `session_id`
//! header on every later call.
//!
//! # Security
//!
//! - The credential travels only as a bearer token and never reaches a log line
//! - Response bodies of rejected calls are logged at trace level only

use crate::config::Role;
use crate::errors::ClientError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::ParticipantId;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};
use url::Url;

/// Header carrying the admitted session id.
pub const SESSION_ID_HEADER: &str = "session_id";

/// Default connect timeout for backend HTTP calls.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct JoinResponse {
    session_id: String,
}

/// An examinee currently connected to the exam session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExamineeInfo {
    pub id: ParticipantId,
    #[serde(default)]
    pub name: String,
}

/// Backend calls the orchestrator depends on.
#[async_trait]
pub trait Admission: Send + Sync {
    /// Join the exam session and return the session id.
    async fn join(&self, exam_id: &str, role: Role) -> Result<String, ClientError>;

    /// Examinees currently connected to the session.
    async fn connected_examinees(
        &self,
        exam_id: &str,
        session_id: &str,
    ) -> Result<Vec<ExamineeInfo>, ClientError>;
}

/// Admission over HTTP with reqwest.
pub struct HttpAdmission {
    http_client: reqwest::Client,
    backend_url: Url,
    credential: SecretString,
}

impl HttpAdmission {
    /// Build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(
        backend_url: Url,
        credential: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            backend_url,
            credential,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.backend_url
            .join(path)
            .map_err(|e| ClientError::InvalidConfig(format!("Invalid backend path {path}: {e}")))
    }

    async fn get(
        &self,
        url: Url,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http_client
            .get(url)
            .bearer_auth(self.credential.expose_secret());
        if let Some(session_id) = session_id {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| {
            debug!(target: "client.admission", error = %e, "HTTP request failed");
            ClientError::Admission(format!("Backend unreachable: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "client.admission", error = %e, "Failed to read error response body");
            String::new()
        });
        warn!(target: "client.admission", status = %status, "Backend rejected request");
        trace!(target: "client.admission", body = %body, "Rejection response body");

        Err(ClientError::Admission(format!("Backend returned {status}")))
    }
}

#[async_trait]
impl Admission for HttpAdmission {
    #[instrument(skip_all, fields(exam_id = %exam_id, role = %role))]
    async fn join(&self, exam_id: &str, role: Role) -> Result<String, ClientError> {
        let path = match role {
            Role::Examinee => format!("sessions/join_session/{exam_id}"),
            Role::Proctor => format!("sessions/supervisor_join_session/{exam_id}"),
        };
        let response = self.get(self.endpoint(&path)?, None).await?;

        let joined: JoinResponse = response.json().await.map_err(|e| {
            warn!(target: "client.admission", error = %e, "Failed to parse join response");
            ClientError::Admission(format!("Invalid join response: {e}"))
        })?;

        if joined.session_id.is_empty() {
            return Err(ClientError::Admission(
                "Backend returned an empty session id".to_string(),
            ));
        }

        debug!(target: "client.admission", "Joined exam session");
        Ok(joined.session_id)
    }

    #[instrument(skip_all, fields(exam_id = %exam_id))]
    async fn connected_examinees(
        &self,
        exam_id: &str,
        session_id: &str,
    ) -> Result<Vec<ExamineeInfo>, ClientError> {
        let url = self.endpoint(&format!("sessions/{exam_id}/examinees"))?;
        let response = self.get(url, Some(session_id)).await?;

        response.json().await.map_err(|e| {
            warn!(target: "client.admission", error = %e, "Failed to parse examinee list");
            ClientError::Admission(format!("Invalid examinee list: {e}"))
        })
    }
}

/// Mock admission for orchestrator tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory admission that hands out a fixed session id.
    pub struct MockAdmission {
        session_id: String,
        examinees: Mutex<Vec<ExamineeInfo>>,
        reject: bool,
        join_calls: AtomicUsize,
    }

    impl MockAdmission {
        /// Admit every join with `session_id`.
        #[must_use]
        pub fn admitting(session_id: impl Into<String>) -> Self {
            Self {
                session_id: session_id.into(),
                examinees: Mutex::new(Vec::new()),
                reject: false,
                join_calls: AtomicUsize::new(0),
            }
        }

        /// Reject every call.
        #[must_use]
        pub fn rejecting() -> Self {
            Self {
                session_id: String::new(),
                examinees: Mutex::new(Vec::new()),
                reject: true,
                join_calls: AtomicUsize::new(0),
            }
        }

        /// Set the connected examinee list.
        pub fn set_examinees(&self, ids: &[&str]) {
            if let Ok(mut examinees) = self.examinees.lock() {
                *examinees = ids
                    .iter()
                    .map(|id| ExamineeInfo {
                        id: ParticipantId::from(*id),
                        name: (*id).to_string(),
                    })
                    .collect();
            }
        }

        #[must_use]
        pub fn join_calls(&self) -> usize {
            self.join_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Admission for MockAdmission {
        async fn join(&self, _exam_id: &str, _role: Role) -> Result<String, ClientError> {
            self.join_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(ClientError::Admission("Backend returned 403 Forbidden".to_string()));
            }
            Ok(self.session_id.clone())
        }

        async fn connected_examinees(
            &self,
            _exam_id: &str,
            _session_id: &str,
        ) -> Result<Vec<ExamineeInfo>, ClientError> {
            if self.reject {
                return Err(ClientError::Admission("Backend returned 403 Forbidden".to_string()));
            }
            self.examinees
                .lock()
                .map(|examinees| examinees.clone())
                .map_err(|_| ClientError::Admission("examinee list poisoned".to_string()))
        }
    }
}
