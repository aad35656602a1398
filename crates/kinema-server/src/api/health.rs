//! Readiness endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health response derived from the lifecycle snapshot.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// Report the pipeline lifecycle state.
///
/// Never touches the executor, so it answers immediately even while
/// the model is still loading or a long generation is in flight.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.lifecycle.status();

    Json(HealthResponse {
        status: status.state.as_str(),
        elapsed_secs: status.elapsed_secs,
        device: status.device.map(|d| d.to_string()),
    })
}
