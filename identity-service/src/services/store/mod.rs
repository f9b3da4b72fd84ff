//! Persistence collaborator for identities, one-time passcodes and refresh
//! tokens.
//!
//! Every method that the auth flows rely on for consistency is a single
//! atomic operation: duplicate-email rejection in [`UserStore::insert`] and
//! [`UserStore::insert_with_otp`], supersede-then-insert in [`UserStore::insert_otp`], the compare-and-swap
//! in [`UserStore::consume_otp`] and rotate-old/insert-new in
//! [`UserStore::rotate_refresh_token`]. Callers never pair a read with a
//! write to get these guarantees.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identity, OtpRecord, ProfileUpdate, RefreshToken};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness rule was violated (duplicate email among live identities).
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    // Identities. Soft-deleted identities are invisible to every lookup.

    async fn find_by_id(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Lookup by normalised email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    /// All live identities, oldest first.
    async fn list(&self) -> Result<Vec<Identity>, StoreError>;

    /// Insert a new identity. Fails with [`StoreError::Conflict`] if a live
    /// identity already holds the email.
    async fn insert(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Insert a new identity together with its first OTP. Either both are
    /// stored or neither is.
    async fn insert_with_otp(&self, identity: &Identity, otp: &OtpRecord)
        -> Result<(), StoreError>;

    /// Apply a typed profile update, returning the updated identity.
    async fn update_profile(
        &self,
        identity_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<Identity>, StoreError>;

    /// Returns `false` if the identity does not exist.
    async fn mark_verified(&self, identity_id: Uuid) -> Result<bool, StoreError>;

    /// Soft delete. Returns `false` if the identity does not exist.
    async fn delete(&self, identity_id: Uuid) -> Result<bool, StoreError>;

    // One-time passcodes

    /// The single usable OTP of an identity, if any.
    async fn find_active_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError>;

    /// The most recently issued OTP regardless of state.
    async fn find_latest_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError>;

    /// Supersede every unconsumed OTP of the identity and insert `otp`.
    async fn insert_otp(&self, otp: &OtpRecord) -> Result<(), StoreError>;

    /// Mark the OTP consumed if it is still active. Returns `false` when
    /// another request consumed it first or it is no longer active.
    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, StoreError>;

    // Refresh tokens

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshToken>, StoreError>;

    /// Lookup restricted to active, unexpired tokens.
    async fn find_active_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    /// Mark `old_token_id` rotated and insert `new_token`, only if the old
    /// token is still active. Returns `false` without inserting otherwise.
    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError>;

    /// Revoke every non-revoked token of a session family.
    async fn revoke_refresh_family(&self, family_id: Uuid) -> Result<u64, StoreError>;

    /// Revoke every active token of the identity and return the distinct
    /// session families that were affected.
    async fn revoke_all_refresh_tokens(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Distinct session families of the identity's unexpired refresh tokens,
    /// whatever their state. An access token minted in any of them may still
    /// be live.
    async fn find_refresh_families(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
