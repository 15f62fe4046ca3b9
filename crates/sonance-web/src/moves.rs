/// Imperative move and refresh endpoints.
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::warn;

use sonance_engine::groups::{Destination, DeviceId, MoveOutcome};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub device: DeviceId,
    pub destination: Destination,
}

/// POST /api/move: classify and dispatch a move without a drag gesture.
///
/// Answers as soon as the optimistic view is published. A move that turns
/// out to be a no-op is still a `200` with an `ignored` outcome.
pub async fn post_move(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveOutcome>, StatusCode> {
    match state.engine.request_move(req.device, req.destination).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            warn!("move rejected: {e}");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// POST /api/refresh: poll the speakers now.
pub async fn post_refresh(State(state): State<AppState>) -> StatusCode {
    match state.engine.refresh() {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
