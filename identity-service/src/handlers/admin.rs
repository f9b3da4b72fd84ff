use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{dtos::user::IdentityListResponse, middleware::AuthUser, AppState};

/// List every live identity
#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All identities", body = IdentityListResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let identities: Vec<_> = state
        .credentials
        .list_identities()
        .await?
        .iter()
        .map(|identity| identity.sanitized())
        .collect();

    tracing::info!(admin_id = %user.0.sub, count = identities.len(), "Listed identities");

    Ok(Json(IdentityListResponse {
        total: identities.len(),
        identities,
    }))
}
