pub mod admin;
pub mod auth;
pub mod user;

use serde::Serialize;
use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct VersionResponse {
    #[schema(example = "identity-service")]
    pub service: String,
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// Service name and version
#[utoipa::path(
    get,
    path = "/api/version",
    responses(
        (status = 200, description = "Service version", body = VersionResponse)
    ),
    tag = "Observability"
)]
pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    })
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    state.blacklist.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Revocation list health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "revocation_list": "up"
        }
    })))
}
