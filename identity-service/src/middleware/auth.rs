use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    models::Role,
    services::{AccessTokenClaims, ServiceError},
    AppState,
};

/// Routes wrapped by [`role_gate`] admit only these roles.
#[derive(Debug, Clone, Copy)]
pub struct RequiredRoles(pub &'static [Role]);

pub const ADMIN_ONLY: RequiredRoles = RequiredRoles(&[Role::Admin]);

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Role check shared by every gated route.
///
/// A missing role means the caller's identity is unknown (401), a role
/// outside `required` means insufficient privilege (403).
pub fn authorize(role: Option<Role>, required: &[Role]) -> Result<Role, AppError> {
    match role {
        None => Err(AppError::Unauthorized(anyhow::anyhow!("Token carries no role"))),
        Some(role) if required.is_empty() || required.contains(&role) => Ok(role),
        Some(role) => {
            tracing::warn!(role = %role, "Role not permitted for route");
            Err(AppError::Forbidden(anyhow::anyhow!("Insufficient privileges")))
        }
    }
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let tokens = state.credentials.tokens();
    let claims = tokens.verify_access(token).map_err(AppError::from)?;

    authorize(claims.role, &[])?;

    // Fail closed: an unreachable revocation list rejects the request.
    if tokens
        .is_session_revoked(claims.sid)
        .await
        .map_err(AppError::from)?
    {
        return Err(ServiceError::TokenRevoked.into());
    }

    // Store claims in request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Middleware enforcing a [`RequiredRoles`] set. Must run after
/// [`auth_middleware`].
pub async fn role_gate(
    State(required): State<RequiredRoles>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let role = req
        .extensions()
        .get::<AccessTokenClaims>()
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))?
        .role;

    authorize(role, required.0)?;

    Ok(next.run(req).await)
}

/// Extractor to easily get claims in handlers
pub struct AuthUser(pub AccessTokenClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth claims missing from request extensions"
            ))
        })?;

        Ok(AuthUser(claims.clone()))
    }
}

/// The raw bearer credential, unverified. Used where the bearer is a
/// refresh token rather than an access token.
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
            .map(|token| BearerToken(token.to_string()))
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
            })
    }
}
