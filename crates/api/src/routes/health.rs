//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use reservation_store::TransactionCoordinator;
use serde::Serialize;

use super::bookings::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health: reports whether the store can hand out a connection.
pub async fn check<C: TransactionCoordinator + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.engine.coordinator().read_only().await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}
