use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{
            LoginRequest, RegenerateOtpRequest, RegenerateOtpResponse, SignupRequest,
            SignupResponse, VerifyOtpRequest,
        },
        MessageResponse,
    },
    middleware::{AuthUser, BearerToken},
    services::NewIdentity,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a new identity
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Identity registered", body = SignupResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn signup(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .credentials
        .signup(NewIdentity {
            email: req.email,
            password: Password::new(req.password),
            username: req.username,
            display_name: req.display_name,
        })
        .await?;

    let otp_code = outcome
        .otp_code
        .filter(|_| state.config.auth.expose_otp_in_response);

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            identity: outcome.identity.sanitized(),
            verification_required: state.credentials.requires_verification(),
            otp_code,
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Identity not verified", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state
        .credentials
        .login(&req.email, Password::new(req.password))
        .await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Verify a one-time passcode and start a session
#[utoipa::path(
    post,
    path = "/auth/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Passcode accepted", body = TokenPair),
        (status = 400, description = "Invalid, expired or already used passcode", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state
        .credentials
        .verify_otp(req.identity_id, &req.code)
        .await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Issue a replacement one-time passcode
#[utoipa::path(
    post,
    path = "/auth/otp/regenerate",
    request_body = RegenerateOtpRequest,
    responses(
        (status = 200, description = "New passcode issued", body = RegenerateOtpResponse),
        (status = 401, description = "Unknown identity", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn regenerate_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegenerateOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.credentials.regenerate_otp(req.identity_id).await?;

    let otp_code = state
        .config
        .auth
        .expose_otp_in_response
        .then_some(issued.code);

    Ok((
        StatusCode::OK,
        Json(RegenerateOtpResponse {
            message: "A new code has been issued".to_string(),
            expiry_utc: issued.record.expiry_utc,
            otp_code,
        }),
    ))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    get,
    path = "/auth/refresh_token",
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenPair),
        (status = 401, description = "Invalid, expired or revoked token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, AppError> {
    let pair = state.credentials.refresh_tokens(&token).await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Logout and revoke every session of the caller
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.logout(user.0.sub).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}
