use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{StoreError, UserStore};
use crate::models::{normalize_email, Identity, OtpRecord, ProfileUpdate, RefreshToken, RefreshTokenState};

#[derive(Default)]
struct Inner {
    identities: HashMap<Uuid, Identity>,
    /// Insertion order doubles as issue order.
    otps: Vec<OtpRecord>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

/// Expired OTPs are kept this long so late attempts still report expiry.
const OTP_RETENTION_MINUTES: i64 = 60;

impl Inner {
    fn insert_identity(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let taken = self
            .identities
            .values()
            .any(|i| !i.is_deleted() && i.email == identity.email);
        if taken || self.identities.contains_key(&identity.identity_id) {
            return Err(StoreError::Conflict(identity.email.clone()));
        }

        self.identities
            .insert(identity.identity_id, identity.clone());
        Ok(())
    }

    /// Drop superseded codes and codes past the retention window.
    fn prune_otps(&mut self) {
        let cutoff = Utc::now() - Duration::minutes(OTP_RETENTION_MINUTES);
        self.otps.retain(|o| !o.superseded && o.expiry_utc > cutoff);
    }

    /// Expired refresh tokens fail JWT validation before any lookup.
    fn prune_refresh_tokens(&mut self) {
        self.refresh_tokens.retain(|_, t| !t.is_expired());
    }
}

/// In-process store.
///
/// Each trait method takes the lock exactly once and never awaits while
/// holding it, so every operation is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable(anyhow::anyhow!("memory store lock poisoned")))
    }
}

fn live(identity: &Identity) -> Option<&Identity> {
    (!identity.is_deleted()).then_some(identity)
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.identities.get(&identity_id).and_then(live).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = normalize_email(email);
        let inner = self.lock()?;
        Ok(inner
            .identities
            .values()
            .find(|i| !i.is_deleted() && i.email == email)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let inner = self.lock()?;
        let mut identities: Vec<Identity> = inner
            .identities
            .values()
            .filter(|i| !i.is_deleted())
            .cloned()
            .collect();
        identities.sort_by_key(|i| i.created_utc);
        Ok(identities)
    }

    async fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        self.lock()?.insert_identity(identity)
    }

    async fn insert_with_otp(
        &self,
        identity: &Identity,
        otp: &OtpRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.insert_identity(identity)?;
        inner.prune_otps();
        inner.otps.push(otp.clone());
        Ok(())
    }

    async fn update_profile(
        &self,
        identity_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<Identity>, StoreError> {
        let mut inner = self.lock()?;
        match inner.identities.get_mut(&identity_id) {
            Some(identity) if !identity.is_deleted() => {
                update.apply_to(identity);
                Ok(Some(identity.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_verified(&self, identity_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.identities.get_mut(&identity_id) {
            Some(identity) if !identity.is_deleted() => {
                identity.verified = true;
                identity.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, identity_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.identities.get_mut(&identity_id) {
            Some(identity) if !identity.is_deleted() => {
                let now = Utc::now();
                identity.deleted_utc = Some(now);
                identity.updated_utc = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_active_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .otps
            .iter()
            .rev()
            .find(|o| o.identity_id == identity_id && o.is_active())
            .cloned())
    }

    async fn find_latest_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .otps
            .iter()
            .rev()
            .find(|o| o.identity_id == identity_id)
            .cloned())
    }

    async fn insert_otp(&self, otp: &OtpRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for existing in inner
            .otps
            .iter_mut()
            .filter(|o| o.identity_id == otp.identity_id && !o.is_consumed())
        {
            existing.superseded = true;
        }
        inner.prune_otps();
        inner.otps.push(otp.clone());
        Ok(())
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.otps.iter_mut().find(|o| o.otp_id == otp_id) {
            Some(otp) if otp.is_active() => {
                otp.consumed_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshToken>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.refresh_tokens.get(&token_id).cloned())
    }

    async fn find_active_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .refresh_tokens
            .get(&token_id)
            .filter(|t| t.is_valid())
            .cloned())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.refresh_tokens.contains_key(&token.token_id) {
            return Err(StoreError::Conflict(token.token_id.to_string()));
        }
        inner.prune_refresh_tokens();
        inner.refresh_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if inner.refresh_tokens.contains_key(&new_token.token_id) {
            return Err(StoreError::Conflict(new_token.token_id.to_string()));
        }

        match inner.refresh_tokens.get_mut(&old_token_id) {
            Some(old) if old.state == RefreshTokenState::Active => {
                old.state = RefreshTokenState::Rotated;
            }
            _ => return Ok(false),
        }

        inner.prune_refresh_tokens();
        inner
            .refresh_tokens
            .insert(new_token.token_id, new_token.clone());
        Ok(true)
    }

    async fn revoke_refresh_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let mut revoked = 0;
        for token in inner
            .refresh_tokens
            .values_mut()
            .filter(|t| t.family_id == family_id && t.state != RefreshTokenState::Revoked)
        {
            token.state = RefreshTokenState::Revoked;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn revoke_all_refresh_tokens(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let mut inner = self.lock()?;
        let mut families = HashSet::new();
        for token in inner
            .refresh_tokens
            .values_mut()
            .filter(|t| t.identity_id == identity_id && t.state == RefreshTokenState::Active)
        {
            token.state = RefreshTokenState::Revoked;
            families.insert(token.family_id);
        }
        Ok(families.into_iter().collect())
    }

    async fn find_refresh_families(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.lock()?;
        let families: HashSet<Uuid> = inner
            .refresh_tokens
            .values()
            .filter(|t| t.identity_id == identity_id && !t.is_expired())
            .map(|t| t.family_id)
            .collect();
        Ok(families.into_iter().collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
