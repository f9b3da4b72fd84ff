use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{dtos::user::UpdateProfileRequest, middleware::AuthUser, utils::ValidatedJson, AppState};

/// Get the caller's identity
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = IdentitySummary),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let identity = state.credentials.get_identity(user.0.sub).await?;
    Ok(Json(identity.sanitized()))
}

/// Update the caller's profile
#[utoipa::path(
    patch,
    path = "/auth/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = IdentitySummary),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state
        .credentials
        .update_profile(user.0.sub, req.into())
        .await?;
    Ok(Json(identity.sanitized()))
}

/// Delete the caller's identity
#[utoipa::path(
    delete,
    path = "/auth/me",
    responses(
        (status = 204, description = "Identity deleted"),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.delete_identity(user.0.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
