pub mod otp_code;
pub mod refresh_token;
pub mod user;

pub use otp_code::OtpRecord;
pub use refresh_token::{RefreshToken, RefreshTokenState};
pub use user::{normalize_email, Identity, IdentitySummary, ProfileUpdate, Role};
