//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::chain::ChainProvider;
use crate::mirror::LoanMirror;
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub environment: String,
    pub version: String,
}

/// GET /health
pub async fn health_check<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
) -> Json<HealthResponse> {
    let database = match state.mirror().ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if database == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        database,
        environment: state.environment.as_str().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
