//! Fuel Routes

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use telemetry::LITERS_PER_GALLON;
use tracing::error;

use crate::AppState;

/// Response for the manual reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Reported consumption cleared by the reset (L, margin applied)
    pub cleared_liters: f64,
    /// Same, in US gallons
    pub cleared_gallons: f64,
}

/// Zero the fuel consumption counter
pub async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, StatusCode> {
    let cleared_liters = state.telemetry.reset_fuel().map_err(|e| {
        error!("Fuel reset failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ResetResponse {
        cleared_liters,
        cleared_gallons: cleared_liters / LITERS_PER_GALLON,
    }))
}
