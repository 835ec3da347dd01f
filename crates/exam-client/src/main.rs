//! Exam Client
//!
//! Headless exam participant. An examinee publishes synthetic audio/video
//! tracks; a proctor subscribes to every connected examinee and follows
//! joins and leaves from the backend event connection.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Connect (admission, media connection, capability load)
//! 4. Publish or subscribe depending on `EXAM_ROLE`
//! 5. Follow backend events until shutdown
//! 6. Disconnect

#![warn(clippy::pedantic)]

use common::config::init_tracing;
use common::types::ParticipantId;
use exam_client::admission::HttpAdmission;
use exam_client::capture::mock::StaticCapture;
use exam_client::config::{ClientConfig, Role};
use exam_client::device::Device;
use exam_client::orchestrator::{SessionEvent, SessionOrchestrator};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;

    init_tracing(&config.observability, "exam_client=info")?;

    info!(
        exam_id = %config.exam_id,
        participant_id = %config.participant_id,
        role = %config.role,
        media_url = %config.media_url,
        "Starting exam client"
    );

    let admission = HttpAdmission::new(
        config.backend_url.clone(),
        config.credential.clone(),
        config.request_timeout,
    )?;
    let role = config.role;
    let mut session = SessionOrchestrator::new(
        config,
        Arc::new(admission),
        Arc::new(StaticCapture::audio_and_video()),
        Device::default(),
    );

    if let Err(e) = run(&mut session, role).await {
        error!(error = %e, "Session setup failed");
        session.disconnect().await;
        return Err(e.into());
    }

    match follow_until_shutdown(&mut session, shutdown_signal()).await {
        Stop::EventsClosed => warn!("Backend event connection closed"),
        Stop::Shutdown => info!("Shutdown signal received"),
    }

    session.disconnect().await;
    info!("Exam client stopped");
    Ok(())
}

async fn run(
    session: &mut SessionOrchestrator,
    role: Role,
) -> Result<(), exam_client::errors::SessionError> {
    session.connect().await?;

    match role {
        Role::Examinee => {
            let producers = session.publish().await?;
            info!(tracks = producers.len(), "Publishing");
        }
        Role::Proctor => {
            for participant_id in session.subscribe_connected().await? {
                resume_stream(session, &participant_id).await;
            }
        }
    }

    // Media keeps flowing without events, so this failure is not fatal
    if let Err(e) = session.connect_events().await {
        warn!(error = %e, "Continuing without backend events");
    }
    Ok(())
}

/// Why the client stopped following the session.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Shutdown,
    EventsClosed,
}

/// Follow backend events until `shutdown` fires or the event connection
/// closes. Without an event connection only `shutdown` ends the session.
async fn follow_until_shutdown<F>(session: &mut SessionOrchestrator, shutdown: F) -> Stop
where
    F: Future<Output = ()>,
{
    if !session.is_events_connected() {
        info!("No backend event connection, media continues until shutdown");
        shutdown.await;
        return Stop::Shutdown;
    }

    tokio::select! {
        () = follow_events(session) => Stop::EventsClosed,
        () = shutdown => Stop::Shutdown,
    }
}

async fn follow_events(session: &mut SessionOrchestrator) {
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::ParticipantConnected {
                participant_id,
                streaming: true,
            } => resume_stream(session, &participant_id).await,
            SessionEvent::CheatingDetected {
                participant_id,
                reason,
                confidence,
            } => {
                warn!(
                    participant_id = %participant_id,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    confidence = confidence.unwrap_or_default(),
                    "Cheating detected"
                );
            }
            SessionEvent::Message { text, sender_id } => {
                info!(
                    sender = sender_id.as_ref().map_or("backend", ParticipantId::as_str),
                    text = %text,
                    "Message received"
                );
            }
            other => info!(event = ?other, "Session event"),
        }
    }
}

/// Resume every paused consumer of one participant's stream.
async fn resume_stream(session: &mut SessionOrchestrator, participant_id: &ParticipantId) {
    let paused: Vec<_> = session
        .stream(participant_id)
        .map(|stream| {
            stream
                .consumers()
                .iter()
                .filter(|c| !c.is_resumed())
                .map(exam_client::transport::RemoteConsumer::id)
                .collect()
        })
        .unwrap_or_default();

    for consumer_id in paused {
        if let Err(e) = session.resume_consumer(consumer_id).await {
            warn!(participant_id = %participant_id, error = %e, "Failed to resume consumer");
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
