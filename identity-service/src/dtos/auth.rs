use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::IdentitySummary;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, max = 128, message = "Password must be 1-128 characters"))]
    #[schema(example = "p@ss1")]
    pub password: String,

    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    #[schema(example = "jdoe")]
    pub username: Option<String>,

    #[validate(length(max = 128, message = "Display name must be at most 128 characters"))]
    #[schema(example = "John Doe")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignupResponse {
    pub identity: IdentitySummary,
    /// Whether login is blocked until the OTP is verified.
    pub verification_required: bool,
    /// Only returned when OTP exposure is enabled (development).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "123456")]
    pub otp_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "p@ss1")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    pub identity_id: Uuid,

    #[validate(length(min = 4, max = 12, message = "Code must be 4-12 characters"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegenerateOtpRequest {
    pub identity_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegenerateOtpResponse {
    #[schema(example = "A new code has been issued")]
    pub message: String,
    pub expiry_utc: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "654321")]
    pub otp_code: Option<String>,
}
