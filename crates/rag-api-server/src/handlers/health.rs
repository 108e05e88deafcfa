use axum::extract::State;
use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Liveness only says the process is up; readiness says it can
/// actually serve a query. The generator and embedding providers are
/// deliberately not probed here — they are external services this
/// process does not own, and a transient outage there should surface
/// as a per-request `Unavailable`, not take the whole instance out of
/// a load balancer's rotation.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    match state.repository.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
