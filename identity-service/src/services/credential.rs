use std::sync::Arc;

use uuid::Uuid;

use crate::models::{normalize_email, Identity, ProfileUpdate, Role};
use crate::services::{IssuedOtp, OtpManager, ServiceError, TokenIssuer, TokenPair, UserStore};
use crate::utils::{Password, PasswordHashString, PasswordHasher};

/// Input for [`CredentialService::signup`].
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password: Password,
    /// Defaults to the local part of the email.
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub identity: Identity,
    /// Present when signup is verification-gated. Delivering it is the
    /// caller's job.
    pub otp_code: Option<String>,
}

/// Orchestrates the identity lifecycle:
/// registered, verified, in session, refreshed, logged out.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    otp: OtpManager,
    tokens: TokenIssuer,
    require_verification: bool,
    /// Verified against when the email is unknown, so both login failures
    /// cost one Argon2 run.
    dummy_hash: PasswordHashString,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        otp: OtpManager,
        tokens: TokenIssuer,
        require_verification: bool,
    ) -> Result<Self, ServiceError> {
        let dummy_hash = hasher.hash(&Password::new(Uuid::new_v4().to_string()))?;

        Ok(Self {
            store,
            hasher,
            otp,
            tokens,
            require_verification,
            dummy_hash,
        })
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn requires_verification(&self) -> bool {
        self.require_verification
    }

    #[tracing::instrument(skip(self, request), fields(email = %normalize_email(&request.email)))]
    pub async fn signup(&self, request: NewIdentity) -> Result<SignupOutcome, ServiceError> {
        let email = normalize_email(&request.email);

        // Fast path only; the store insert is what actually closes the race.
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::IdentityExists);
        }

        let password_hash = self.hash_password(request.password).await?;
        let username = request
            .username
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        let mut identity = Identity::new(
            email,
            username,
            request.display_name,
            password_hash.into_string(),
        );
        identity.verified = !self.require_verification;

        let otp_code = if self.require_verification {
            let issued = self.otp.issue(identity.identity_id);
            self.store.insert_with_otp(&identity, &issued.record).await?;
            Some(issued.code)
        } else {
            self.store.insert(&identity).await?;
            None
        };

        tracing::info!(identity_id = %identity.identity_id, "Identity registered");
        Ok(SignupOutcome { identity, otp_code })
    }

    #[tracing::instrument(skip(self, password), fields(email = %normalize_email(email)))]
    pub async fn login(&self, email: &str, password: Password) -> Result<TokenPair, ServiceError> {
        let identity = match self.store.find_by_email(email).await? {
            Some(identity) => identity,
            None => {
                self.verify_password(self.dummy_hash.clone(), password)
                    .await?;
                return Err(ServiceError::IdentityNotFound);
            }
        };

        let stored = PasswordHashString::new(identity.password_hash.clone());
        if !self.verify_password(stored, password).await? {
            tracing::warn!(identity_id = %identity.identity_id, "Password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }

        if self.require_verification && !identity.verified {
            return Err(ServiceError::IdentityUnverified);
        }

        let pair = self.tokens.issue_pair(&identity).await?;
        tracing::info!(identity_id = %identity.identity_id, "Login succeeded");
        Ok(pair)
    }

    /// Consume the identity's passcode, mark it verified and open a session.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify_otp(
        &self,
        identity_id: Uuid,
        code: &str,
    ) -> Result<TokenPair, ServiceError> {
        let mut identity = self
            .store
            .find_by_id(identity_id)
            .await?
            .ok_or(ServiceError::OtpInvalid)?;

        self.otp.verify(identity_id, code).await?;

        if !identity.verified {
            if !self.store.mark_verified(identity_id).await? {
                return Err(ServiceError::IdentityNotFound);
            }
            identity.verified = true;
            tracing::info!("Identity verified");
        }

        self.tokens.issue_pair(&identity).await
    }

    /// Issue a replacement passcode. Earlier codes stop working.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_otp(&self, identity_id: Uuid) -> Result<IssuedOtp, ServiceError> {
        if self.store.find_by_id(identity_id).await?.is_none() {
            return Err(ServiceError::IdentityNotFound);
        }
        self.otp.generate(identity_id).await
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        self.tokens.rotate(refresh_token).await
    }

    /// Revoke every session of the identity. Logging out twice is fine.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self, identity_id: Uuid) -> Result<(), ServiceError> {
        self.tokens.revoke(identity_id).await?;
        Ok(())
    }

    pub async fn get_identity(&self, identity_id: Uuid) -> Result<Identity, ServiceError> {
        self.store
            .find_by_id(identity_id)
            .await?
            .ok_or(ServiceError::IdentityNotFound)
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, ServiceError> {
        Ok(self.store.list().await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_profile(
        &self,
        identity_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Identity, ServiceError> {
        if update.is_empty() {
            return Err(ServiceError::Validation(
                "No profile fields to update".to_string(),
            ));
        }

        self.store
            .update_profile(identity_id, &update)
            .await?
            .ok_or(ServiceError::IdentityNotFound)
    }

    /// End the identity's sessions, then soft delete it. A failed revocation
    /// leaves the identity in place so the call can be retried.
    #[tracing::instrument(skip(self))]
    pub async fn delete_identity(&self, identity_id: Uuid) -> Result<(), ServiceError> {
        if self.store.find_by_id(identity_id).await?.is_none() {
            return Err(ServiceError::IdentityNotFound);
        }
        self.tokens.revoke(identity_id).await?;

        if !self.store.delete(identity_id).await? {
            return Err(ServiceError::IdentityNotFound);
        }

        tracing::info!("Identity deleted");
        Ok(())
    }

    /// Create a verified admin identity unless the email is already taken.
    ///
    /// Returns `true` when a new identity was created.
    #[tracing::instrument(skip(self, password), fields(email = %normalize_email(email)))]
    pub async fn ensure_admin(&self, email: &str, password: Password) -> Result<bool, ServiceError> {
        if self.store.find_by_email(email).await?.is_some() {
            return Ok(false);
        }

        let email = normalize_email(email);
        let username = email.split('@').next().unwrap_or_default().to_string();
        let password_hash = self.hash_password(password).await?;

        let mut identity = Identity::new(email, username, None, password_hash.into_string());
        identity.role = Role::Admin;
        identity.verified = true;

        match self.store.insert(&identity).await {
            Ok(()) => {
                tracing::info!(identity_id = %identity.identity_id, "Admin identity created");
                Ok(true)
            }
            Err(crate::services::StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn hash_password(&self, password: Password) -> Result<PasswordHashString, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::HashingError(format!("Hashing task failed: {}", e)))?
    }

    async fn verify_password(
        &self,
        hash: PasswordHashString,
        password: Password,
    ) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| ServiceError::HashingError(format!("Hashing task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::config::{JwtConfig, OtpConfig, PasswordConfig};
    use crate::models::{OtpRecord, RefreshToken};
    use crate::services::blacklist::testing::FlakyBlacklist;
    use crate::services::{JwtService, MemoryBlacklist, MemoryStore, StoreError, TokenBlacklist};

    /// Memory store whose first combined identity and OTP insert fails.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn find_by_id(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
            self.inner.find_by_id(identity_id).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
            self.inner.find_by_email(email).await
        }
        async fn list(&self) -> Result<Vec<Identity>, StoreError> {
            self.inner.list().await
        }
        async fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
            self.inner.insert(identity).await
        }
        async fn insert_with_otp(
            &self,
            identity: &Identity,
            otp: &OtpRecord,
        ) -> Result<(), StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable(anyhow::anyhow!("otp insert failed")));
            }
            self.inner.insert_with_otp(identity, otp).await
        }
        async fn update_profile(
            &self,
            identity_id: Uuid,
            update: &ProfileUpdate,
        ) -> Result<Option<Identity>, StoreError> {
            self.inner.update_profile(identity_id, update).await
        }
        async fn mark_verified(&self, identity_id: Uuid) -> Result<bool, StoreError> {
            self.inner.mark_verified(identity_id).await
        }
        async fn delete(&self, identity_id: Uuid) -> Result<bool, StoreError> {
            self.inner.delete(identity_id).await
        }
        async fn find_active_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
            self.inner.find_active_otp(identity_id).await
        }
        async fn find_latest_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
            self.inner.find_latest_otp(identity_id).await
        }
        async fn insert_otp(&self, otp: &OtpRecord) -> Result<(), StoreError> {
            self.inner.insert_otp(otp).await
        }
        async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, StoreError> {
            self.inner.consume_otp(otp_id).await
        }
        async fn find_refresh_token(
            &self,
            token_id: Uuid,
        ) -> Result<Option<RefreshToken>, StoreError> {
            self.inner.find_refresh_token(token_id).await
        }
        async fn find_active_refresh_token(
            &self,
            token_id: Uuid,
        ) -> Result<Option<RefreshToken>, StoreError> {
            self.inner.find_active_refresh_token(token_id).await
        }
        async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
            self.inner.insert_refresh_token(token).await
        }
        async fn rotate_refresh_token(
            &self,
            old_token_id: Uuid,
            new_token: &RefreshToken,
        ) -> Result<bool, StoreError> {
            self.inner.rotate_refresh_token(old_token_id, new_token).await
        }
        async fn revoke_refresh_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
            self.inner.revoke_refresh_family(family_id).await
        }
        async fn revoke_all_refresh_tokens(
            &self,
            identity_id: Uuid,
        ) -> Result<Vec<Uuid>, StoreError> {
            self.inner.revoke_all_refresh_tokens(identity_id).await
        }
        async fn find_refresh_families(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
            self.inner.find_refresh_families(identity_id).await
        }
        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    fn service(require_verification: bool) -> CredentialService {
        service_with(
            require_verification,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlacklist::new()),
        )
    }

    fn service_with(
        require_verification: bool,
        store: Arc<dyn UserStore>,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> CredentialService {
        let hasher = PasswordHasher::new(&PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let otp = OtpManager::new(
            store.clone(),
            &OtpConfig {
                length: 6,
                expiry_minutes: 10,
                alphanumeric: false,
            },
        );
        let jwt = JwtService::new(&JwtConfig {
            secret: "0123456789abcdef0123456789abcdef".to_string(),
            issuer: "identity-service".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        });
        let tokens = TokenIssuer::new(jwt, store.clone(), blacklist);

        CredentialService::new(store, hasher, otp, tokens, require_verification).unwrap()
    }

    fn new_identity(email: &str, password: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            password: Password::new(password.to_string()),
            username: None,
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let svc = service(false);
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();

        assert_eq!(outcome.identity.role, Role::User);
        assert_eq!(outcome.identity.username, "a");
        assert!(outcome.otp_code.is_none());

        let pair = svc
            .login("a@x.com", Password::new("p@ss1".to_string()))
            .await
            .unwrap();
        let claims = svc.tokens().verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, outcome.identity.identity_id);

        assert!(matches!(
            svc.login("a@x.com", Password::new("wrong".to_string())).await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_login_unknown_email() {
        let svc = service(false);
        assert!(matches!(
            svc.login("nobody@x.com", Password::new("p@ss1".to_string()))
                .await,
            Err(ServiceError::IdentityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_signup_is_rejected() {
        let svc = service(false);
        svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();

        assert!(matches!(
            svc.signup(new_identity("A@x.com", "other")).await,
            Err(ServiceError::IdentityExists)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_signups_have_one_winner() {
        let svc = service(false);

        let attempts = (0..8).map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.signup(new_identity("race@x.com", "p@ss1")).await })
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(Ok(_)) | Ok(Err(ServiceError::IdentityExists)))));
    }

    #[tokio::test]
    async fn test_verification_gated_login() {
        let svc = service(true);
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();
        let code = outcome.otp_code.unwrap();

        assert!(matches!(
            svc.login("a@x.com", Password::new("p@ss1".to_string()))
                .await,
            Err(ServiceError::IdentityUnverified)
        ));

        svc.verify_otp(outcome.identity.identity_id, &code)
            .await
            .unwrap();
        assert!(matches!(
            svc.verify_otp(outcome.identity.identity_id, &code).await,
            Err(ServiceError::OtpAlreadyUsed)
        ));

        svc.login("a@x.com", Password::new("p@ss1".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_regenerate_unknown_identity() {
        assert!(matches!(
            service(true).regenerate_otp(Uuid::new_v4()).await,
            Err(ServiceError::IdentityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_and_is_idempotent() {
        let svc = service(false);
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();
        let pair = svc
            .login("a@x.com", Password::new("p@ss1".to_string()))
            .await
            .unwrap();

        svc.logout(outcome.identity.identity_id).await.unwrap();
        svc.logout(outcome.identity.identity_id).await.unwrap();

        assert!(matches!(
            svc.refresh_tokens(&pair.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_update_profile_rejects_empty_update() {
        let svc = service(false);
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();

        assert!(matches!(
            svc.update_profile(outcome.identity.identity_id, ProfileUpdate::default())
                .await,
            Err(ServiceError::Validation(_))
        ));

        let updated = svc
            .update_profile(
                outcome.identity.identity_id,
                ProfileUpdate {
                    display_name: Some("Alice".to_string()),
                    username: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Alice"));
        assert_eq!(updated.role, Role::User);
    }

    #[tokio::test]
    async fn test_delete_identity_ends_sessions() {
        let svc = service(false);
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();
        let id = outcome.identity.identity_id;
        let pair = svc
            .login("a@x.com", Password::new("p@ss1".to_string()))
            .await
            .unwrap();

        svc.delete_identity(id).await.unwrap();

        assert!(matches!(
            svc.get_identity(id).await,
            Err(ServiceError::IdentityNotFound)
        ));
        assert!(matches!(
            svc.refresh_tokens(&pair.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert!(matches!(
            svc.delete_identity(id).await,
            Err(ServiceError::IdentityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_failed_signup_leaves_email_free() {
        let svc = service_with(
            true,
            Arc::new(FlakyStore::default()),
            Arc::new(MemoryBlacklist::new()),
        );

        assert!(matches!(
            svc.signup(new_identity("a@x.com", "p@ss1")).await,
            Err(ServiceError::StoreUnavailable(_))
        ));
        assert!(matches!(
            svc.login("a@x.com", Password::new("p@ss1".to_string())).await,
            Err(ServiceError::IdentityNotFound)
        ));

        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();
        let code = outcome.otp_code.unwrap();
        svc.verify_otp(outcome.identity.identity_id, &code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_retry_after_revocation_failure() {
        let svc = service_with(
            false,
            Arc::new(MemoryStore::new()),
            Arc::new(FlakyBlacklist::failing(1)),
        );
        let outcome = svc.signup(new_identity("a@x.com", "p@ss1")).await.unwrap();
        let id = outcome.identity.identity_id;
        let pair = svc
            .login("a@x.com", Password::new("p@ss1".to_string()))
            .await
            .unwrap();
        let sid = svc.tokens().verify_access(&pair.access_token).unwrap().sid;

        assert!(matches!(
            svc.delete_identity(id).await,
            Err(ServiceError::Internal(_))
        ));
        assert!(svc.get_identity(id).await.is_ok());

        svc.delete_identity(id).await.unwrap();
        assert!(matches!(
            svc.get_identity(id).await,
            Err(ServiceError::IdentityNotFound)
        ));
        assert!(svc.tokens().is_session_revoked(sid).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_admin_creates_once() {
        let svc = service(true);
        assert!(svc
            .ensure_admin("root@x.com", Password::new("s3cret".to_string()))
            .await
            .unwrap());
        assert!(!svc
            .ensure_admin("root@x.com", Password::new("s3cret".to_string()))
            .await
            .unwrap());

        let pair = svc
            .login("root@x.com", Password::new("s3cret".to_string()))
            .await
            .unwrap();
        let claims = svc.tokens().verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.role, Some(Role::Admin));
    }
}
