use service_core::error::AppError;
use thiserror::Error;

use crate::services::store::StoreError;

/// Every failure the auth core can produce.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Identity already exists")]
    IdentityExists,

    #[error("Identity not verified")]
    IdentityUnverified,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Hashing error: {0}")]
    HashingError(String),

    #[error("Invalid one-time passcode")]
    OtpInvalid,

    #[error("One-time passcode expired")]
    OtpExpired,

    #[error("One-time passcode already used")]
    OtpAlreadyUsed,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable name of the error kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::IdentityNotFound => "identity_not_found",
            ServiceError::IdentityExists => "identity_exists",
            ServiceError::IdentityUnverified => "identity_unverified",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::HashingError(_) => "hashing_error",
            ServiceError::OtpInvalid => "otp_invalid",
            ServiceError::OtpExpired => "otp_expired",
            ServiceError::OtpAlreadyUsed => "otp_already_used",
            ServiceError::TokenInvalid => "token_invalid",
            ServiceError::TokenExpired => "token_expired",
            ServiceError::TokenRevoked => "token_revoked",
            ServiceError::StoreUnavailable(_) => "store_unavailable",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ServiceError::IdentityExists,
            StoreError::Unavailable(e) => ServiceError::StoreUnavailable(e),
        }
    }
}

/// Message shared by every credential failure so that callers cannot tell
/// an unknown email from a wrong password.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        match &err {
            ServiceError::HashingError(_)
            | ServiceError::StoreUnavailable(_)
            | ServiceError::Internal(_) => {
                tracing::error!(kind, error = %err, "Auth request failed");
            }
            _ => tracing::info!(kind, "Auth request rejected"),
        }

        match err {
            ServiceError::IdentityNotFound | ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!(INVALID_CREDENTIALS_MESSAGE))
            }
            ServiceError::IdentityExists => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::IdentityUnverified => AppError::Forbidden(anyhow::anyhow!(
                "Account not verified. Please verify the one-time passcode."
            )),
            ServiceError::OtpInvalid => AppError::BadRequest(anyhow::anyhow!("Invalid OTP code")),
            ServiceError::OtpExpired => AppError::BadRequest(anyhow::anyhow!("OTP has expired")),
            ServiceError::OtpAlreadyUsed => {
                AppError::BadRequest(anyhow::anyhow!("OTP has already been used"))
            }
            ServiceError::TokenInvalid => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            ServiceError::TokenExpired => AppError::Unauthorized(anyhow::anyhow!("Token expired")),
            ServiceError::TokenRevoked => {
                AppError::Unauthorized(anyhow::anyhow!("Token has been revoked"))
            }
            ServiceError::Validation(msg) => {
                let mut error = validator::ValidationError::new("invalid");
                error.message = Some(msg.into());
                let mut errors = validator::ValidationErrors::new();
                errors.add("request", error);
                AppError::ValidationError(errors)
            }
            ServiceError::StoreUnavailable(e) => AppError::DatabaseError(e),
            ServiceError::HashingError(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn test_login_failures_render_identically() {
        let not_found = AppError::from(ServiceError::IdentityNotFound);
        let bad_password = AppError::from(ServiceError::InvalidCredentials);

        assert_eq!(not_found.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(bad_password.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(not_found.to_string(), bad_password.to_string());
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::IdentityExists, StatusCode::CONFLICT),
            (ServiceError::IdentityUnverified, StatusCode::FORBIDDEN),
            (ServiceError::OtpInvalid, StatusCode::BAD_REQUEST),
            (ServiceError::OtpExpired, StatusCode::BAD_REQUEST),
            (ServiceError::OtpAlreadyUsed, StatusCode::BAD_REQUEST),
            (ServiceError::TokenInvalid, StatusCode::UNAUTHORIZED),
            (
                ServiceError::Validation("nothing to update".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ServiceError::TokenExpired, StatusCode::UNAUTHORIZED),
            (ServiceError::TokenRevoked, StatusCode::UNAUTHORIZED),
            (
                ServiceError::StoreUnavailable(anyhow::anyhow!("pool timed out")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::HashingError("bad params".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_store_conflict_becomes_identity_exists() {
        let err = ServiceError::from(StoreError::Conflict("email".to_string()));
        assert!(matches!(err, ServiceError::IdentityExists));
    }
}
