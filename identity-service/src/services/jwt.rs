use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Role;
use crate::services::ServiceError;

/// Distinguishes the two token kinds so one can never stand in for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (identity ID)
    pub sub: Uuid,
    /// Role at issue time. Tokens without one are rejected by the gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Session family this token was minted in
    pub sid: Uuid,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub jti: Uuid,
    pub token_use: TokenUse,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    /// Token ID (matches the persisted refresh record)
    pub jti: Uuid,
    pub sid: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub token_use: TokenUse,
}

trait TokenClaims: DeserializeOwned {
    fn token_use(&self) -> TokenUse;
}

impl TokenClaims for AccessTokenClaims {
    fn token_use(&self) -> TokenUse {
        self.token_use
    }
}

impl TokenClaims for RefreshTokenClaims {
    fn token_use(&self) -> TokenUse {
        self.token_use
    }
}

/// HS256 signing and verification. Holds no token state.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        tracing::info!("JWT service initialized with HS256 key");

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_expiry_minutes)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn generate_access_token(
        &self,
        identity_id: Uuid,
        role: Role,
        session_id: Uuid,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: identity_id,
            role: Some(role),
            sid: session_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl()).timestamp(),
            jti: Uuid::new_v4(),
            token_use: TokenUse::Access,
        };

        self.sign(&claims)
    }

    pub fn generate_refresh_token(
        &self,
        identity_id: Uuid,
        token_id: Uuid,
        session_id: Uuid,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = RefreshTokenClaims {
            sub: identity_id,
            jti: token_id,
            sid: session_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl()).timestamp(),
            token_use: TokenUse::Refresh,
        };

        self.sign(&claims)
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.verify(token, TokenUse::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, ServiceError> {
        self.verify(token, TokenUse::Refresh)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, ServiceError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    fn verify<T: TokenClaims>(&self, token: &str, expected: TokenUse) -> Result<T, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<T>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => {
                    tracing::debug!(error = %e, "Token rejected");
                    ServiceError::TokenInvalid
                }
            })?
            .claims;

        if claims.token_use() != expected {
            return Err(ServiceError::TokenInvalid);
        }

        Ok(claims)
    }
}
