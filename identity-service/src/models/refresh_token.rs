use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Lifecycle state of a persisted refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTokenState {
    Active,
    /// Exchanged for a newer pair; presenting it again is a replay.
    Rotated,
    /// Invalidated by logout, account deletion or replay detection.
    Revoked,
}

impl RefreshTokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTokenState::Active => "active",
            RefreshTokenState::Rotated => "rotated",
            RefreshTokenState::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for RefreshTokenState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RefreshTokenState::Active),
            "rotated" => Ok(RefreshTokenState::Rotated),
            "revoked" => Ok(RefreshTokenState::Revoked),
            _ => Err(format!("Invalid refresh token state: {}", s)),
        }
    }
}

/// Refresh token record for session management
#[derive(Debug, Clone)]
pub struct RefreshToken {
    /// Unique identifier for the refresh token (jti claim)
    pub token_id: Uuid,

    /// Identity this token belongs to
    pub identity_id: Uuid,

    /// Session family shared by every token minted through rotation (sid claim)
    pub family_id: Uuid,

    /// SHA-256 hash of the refresh token
    pub token_hash: String,

    pub issued_utc: DateTime<Utc>,

    pub expiry_utc: DateTime<Utc>,

    pub state: RefreshTokenState,
}

impl RefreshToken {
    /// Create a new active refresh token record for the signed `token`
    pub fn new(
        token_id: Uuid,
        identity_id: Uuid,
        family_id: Uuid,
        token: &str,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id,
            identity_id,
            family_id,
            token_hash: Self::hash_token(token),
            issued_utc: now,
            expiry_utc: now + ttl,
            state: RefreshTokenState::Active,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time comparison of `token` against the stored hash
    pub fn matches(&self, token: &str) -> bool {
        let candidate = Self::hash_token(token);
        candidate
            .as_bytes()
            .ct_eq(self.token_hash.as_bytes())
            .into()
    }

    /// Check if this token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }

    /// Check if this token is valid (not expired and still active)
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && self.state == RefreshTokenState::Active
    }
}
