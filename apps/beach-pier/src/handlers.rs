use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{error::RelayError, signaling::Command, state::AppState};

#[derive(Debug, Deserialize)]
pub struct LaunchQuery {
    #[serde(default, rename = "userId", alias = "identity")]
    pub identity: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    registered: usize,
}

#[derive(Debug)]
pub enum ApiError {
    NotConnected,
    PeerNotReady(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotConnected => (StatusCode::NOT_FOUND, "User not connected.".to_string()),
            ApiError::PeerNotReady(reason) => (
                StatusCode::CONFLICT,
                format!("Peer channel not ready: {reason}"),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send command.".to_string(),
            ),
        };
        (status, Json(MessageResponse { message })).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotConnected(_) => ApiError::NotConnected,
            RelayError::PeerChannel { source, .. } => ApiError::PeerNotReady(source.to_string()),
            other => {
                error!(error = %other, "command dispatch failed");
                ApiError::Internal
            }
        }
    }
}

/// GET|POST /launch-edge?userId=... - Ask a connected client to open Edge
pub async fn launch_edge(
    State(state): State<AppState>,
    Query(query): Query<LaunchQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    // A missing identity can never be connected.
    let identity = query
        .identity
        .filter(|identity| !identity.trim().is_empty())
        .ok_or(ApiError::NotConnected)?;
    let url = query
        .url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| state.default_launch_url.to_string());
    state
        .dispatcher
        .dispatch(&identity, &Command::launch_edge(url))
        .await?;
    Ok(Json(MessageResponse {
        message: "Command sent to client.".to_string(),
    }))
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        registered: state.registry.len(),
    })
}
