//! OTP code model - one-time passcode verification.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// OTP record entity. Only the SHA-256 hash of the code is kept.
#[derive(Debug, Clone)]
pub struct OtpRecord {
    pub otp_id: Uuid,
    pub identity_id: Uuid,
    pub code_hash: String,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub superseded: bool,
}

impl OtpRecord {
    /// Create a new OTP record expiring `ttl` from now.
    pub fn new(identity_id: Uuid, code_hash: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            otp_id: Uuid::new_v4(),
            identity_id,
            code_hash,
            issued_utc: now,
            expiry_utc: now + ttl,
            consumed_utc: None,
            superseded: false,
        }
    }

    /// Check if OTP has been used.
    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    /// Check if OTP has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }

    /// Active means usable: not consumed, not superseded, not expired.
    pub fn is_active(&self) -> bool {
        !self.is_consumed() && !self.superseded && !self.is_expired()
    }
}
