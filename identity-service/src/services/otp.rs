use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::models::OtpRecord;
use crate::services::{ServiceError, UserStore};

const NUMERIC: &[u8] = b"0123456789";
/// Uppercase letters and digits without the easily confused 0/O and 1/I.
const ALPHANUMERIC: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly issued passcode. `code` is the only plaintext copy.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub record: OtpRecord,
    pub code: String,
}

/// Generates and verifies single-use passcodes for an identity.
#[derive(Clone)]
pub struct OtpManager {
    store: Arc<dyn UserStore>,
    length: usize,
    ttl: Duration,
    alphanumeric: bool,
}

impl OtpManager {
    pub fn new(store: Arc<dyn UserStore>, config: &OtpConfig) -> Self {
        Self {
            store,
            length: config.length,
            ttl: Duration::minutes(config.expiry_minutes),
            alphanumeric: config.alphanumeric,
        }
    }

    /// Override the expiry window.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_code(&self) -> String {
        let alphabet = if self.alphanumeric {
            ALPHANUMERIC
        } else {
            NUMERIC
        };
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    fn normalize(&self, code: &str) -> String {
        let code = code.trim();
        if self.alphanumeric {
            code.to_uppercase()
        } else {
            code.to_string()
        }
    }

    /// Mint a code and its record without storing it.
    pub fn issue(&self, identity_id: Uuid) -> IssuedOtp {
        let code = self.generate_code();
        let record = OtpRecord::new(identity_id, Self::hash_code(&code), self.ttl);
        IssuedOtp { record, code }
    }

    /// Issue a new code, superseding any earlier one for the identity.
    #[tracing::instrument(skip(self))]
    pub async fn generate(&self, identity_id: Uuid) -> Result<IssuedOtp, ServiceError> {
        let IssuedOtp { record, code } = self.issue(identity_id);

        self.store.insert_otp(&record).await?;

        tracing::info!(otp_id = %record.otp_id, expiry_utc = %record.expiry_utc, "OTP issued");
        Ok(IssuedOtp { record, code })
    }

    /// Verify and consume `code`.
    ///
    /// Only the latest code of the identity can succeed. The hash comparison
    /// runs before any state check so the failure kinds share one code path.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify(&self, identity_id: Uuid, code: &str) -> Result<(), ServiceError> {
        let record = self
            .store
            .find_latest_otp(identity_id)
            .await?
            .ok_or(ServiceError::OtpInvalid)?;

        let candidate = Self::hash_code(&self.normalize(code));
        let matches: bool = candidate
            .as_bytes()
            .ct_eq(record.code_hash.as_bytes())
            .into();

        if !matches || record.superseded {
            return Err(ServiceError::OtpInvalid);
        }
        if record.is_consumed() {
            return Err(ServiceError::OtpAlreadyUsed);
        }
        if record.is_expired() {
            return Err(ServiceError::OtpExpired);
        }

        // Another request may have consumed it since the read above.
        if !self.store.consume_otp(record.otp_id).await? {
            return Err(ServiceError::OtpAlreadyUsed);
        }

        tracing::info!(otp_id = %record.otp_id, "OTP verified");
        Ok(())
    }
}
