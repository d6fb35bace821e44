use super::state::AppState;
use crate::audio::CaptureMode;
use crate::error::SessionError;
use crate::session::{
    Session, SessionConfig, SessionSnapshot, SessionState, SessionStats, TranscriptSegment,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    pub source_lang: Option<String>,
    pub target_lang: Option<String>,

    /// `microphone` or `system_audio`
    pub mode: Option<CaptureMode>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: SessionState,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize)]
pub struct LanguagesRequest {
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct LanguagesResponse {
    pub session_id: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub transcript: String,
    pub translation: String,
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn session_error_response(e: SessionError) -> Response {
    let status = match &e {
        SessionError::NotActive(_) => StatusCode::CONFLICT,
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Channel(_) => StatusCode::BAD_GATEWAY,
        SessionError::Terminated => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn no_session() -> Response {
    error_response(StatusCode::NOT_FOUND, "No session has been started")
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a new streaming session
pub async fn start_session(
    State(state): State<AppState>,
    body: Option<Json<StartSessionRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    // Only one live session at a time. No lock is held while the actor answers.
    let current = state.session.read().await.clone();
    if let Some(current) = current.as_ref() {
        if let Ok(stats) = current.stats().await {
            if stats.state != SessionState::Closed {
                return error_response(
                    StatusCode::CONFLICT,
                    format!("Session {} is already {}", stats.session_id, stats.state),
                );
            }
        }
    }

    let defaults: &SessionConfig = &state.defaults;
    let config = SessionConfig {
        session_id: req
            .session_id
            .unwrap_or_else(|| format!("interpreter-{}", uuid::Uuid::new_v4())),
        source_lang: req.source_lang.unwrap_or_else(|| defaults.source_lang.clone()),
        target_lang: req.target_lang.unwrap_or_else(|| defaults.target_lang.clone()),
        mode: req.mode.unwrap_or(defaults.mode),
        ..defaults.clone()
    };
    let session_id = config.session_id.clone();

    let mut slot = state.session.write().await;
    let unchanged = match (slot.as_ref(), current.as_ref()) {
        (None, None) => true,
        (Some(stored), Some(seen)) => stored.same_session(seen),
        _ => false,
    };
    if !unchanged {
        let other = slot.as_ref().map(|h| h.session_id().to_string()).unwrap_or_default();
        return error_response(
            StatusCode::CONFLICT,
            format!("Session {} was started concurrently", other),
        );
    }

    info!("Starting session {}", session_id);
    let handle = Session::spawn(config, state.deps.clone());
    *slot = Some(handle.clone());
    // A concurrent start now sees this session and gets a conflict
    drop(slot);

    match handle.start().await {
        Ok(()) => {
            info!("Session {} started", session_id);
            (
                StatusCode::OK,
                Json(StartSessionResponse {
                    session_id: session_id.clone(),
                    status: SessionState::Active,
                    message: format!("Session {} streaming", session_id),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start session {}: {}", session_id, e);
            session_error_response(e)
        }
    }
}

/// POST /session/stop
/// Stop the current session
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    let Some(session) = state.current().await else {
        return no_session();
    };

    info!("Stopping session {}", session.session_id());
    match session.stop().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StopSessionResponse {
                session_id: stats.session_id.clone(),
                status: stats.state,
                message: "Session stopped".to_string(),
                stats,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop session: {}", e);
            session_error_response(e)
        }
    }
}

/// POST /session/languages
/// Change languages mid-session
pub async fn set_languages(
    State(state): State<AppState>,
    Json(req): Json<LanguagesRequest>,
) -> impl IntoResponse {
    let Some(session) = state.current().await else {
        return no_session();
    };

    match session.set_languages(req.source_lang, req.target_lang).await {
        Ok(()) => languages_response(session.session_id(), session.stats().await),
        Err(e) => session_error_response(e),
    }
}

/// POST /session/languages/swap
/// Exchange source and target languages
pub async fn swap_languages(State(state): State<AppState>) -> impl IntoResponse {
    let Some(session) = state.current().await else {
        return no_session();
    };

    match session.swap_languages().await {
        Ok(()) => languages_response(session.session_id(), session.stats().await),
        Err(e) => session_error_response(e),
    }
}

fn languages_response(session_id: &str, stats: Result<SessionStats, SessionError>) -> Response {
    match stats {
        Ok(stats) => (
            StatusCode::OK,
            Json(LanguagesResponse {
                session_id: session_id.to_string(),
                source_lang: stats.source_lang,
                target_lang: stats.target_lang,
            }),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET /session/status
/// Get stats of the current session
pub async fn get_session_status(State(state): State<AppState>) -> impl IntoResponse {
    let Some(session) = state.current().await else {
        return no_session();
    };

    match session.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            session_error_response(e)
        }
    }
}

/// GET /session/transcript
/// Get transcript and translation accumulated since the last language change
pub async fn get_session_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let Some(session) = state.current().await else {
        return no_session();
    };

    match session.snapshot().await {
        Ok(SessionSnapshot {
            stats,
            transcript,
            translation,
            segments,
        }) => (
            StatusCode::OK,
            Json(TranscriptResponse {
                session_id: stats.session_id,
                transcript,
                translation,
                segments,
            }),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
