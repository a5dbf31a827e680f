//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger::CompensationLedger;
use serde::Serialize;

use super::jobs::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub participant: String,
}

/// GET /health: liveness plus the participant this instance serves.
pub async fn check<L: CompensationLedger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        participant: state.participant.id().to_string(),
    })
}
