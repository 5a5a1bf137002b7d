//! HTTP routes.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use voxrelay_core::envelope::Envelope;

use super::AppState;
use crate::error::RoutingError;
use crate::registry::SessionId;
use crate::router::Route;

/// Body of `POST /relay`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub content: String,
    #[serde(default)]
    pub target_session_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `POST /relay` - send a command to exactly one session.
pub async fn relay(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RelayRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
    };

    let Some(target) = request
        .target_session_id
        .filter(|t| !t.trim().is_empty())
    else {
        return error_response(StatusCode::NOT_FOUND, "targetSessionId is required");
    };
    let Ok(session_id) = target.trim().parse::<SessionId>() else {
        warn!(target = %target, "Relay target is not a session id");
        return error_response(
            StatusCode::NOT_FOUND,
            RoutingError::TargetNotFound { session_id: target }.to_string(),
        );
    };

    let report = state
        .broker
        .publish(&Envelope::submit(request.content), Route::Unicast(session_id))
        .await;

    if report.target_not_found() {
        (StatusCode::NOT_FOUND, Json(report)).into_response()
    } else if !report.is_clean() {
        // The target existed but its connection failed; it is now unregistered.
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    } else {
        info!(session_id = %session_id, "Command relayed");
        (StatusCode::ACCEPTED, Json(report)).into_response()
    }
}

/// `GET /sessions`
pub async fn sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.broker.registry().sessions().await)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.broker.registry().session_count().await;
    Json(json!({ "status": "ok", "sessions": sessions }))
}
