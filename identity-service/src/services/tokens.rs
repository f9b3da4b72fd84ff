//! Session token issuance, verification, rotation and revocation.
//!
//! Every pair belongs to a session family (`sid`). Rotation keeps the family
//! and retires the presented refresh token in the same store operation.
//! Presenting a retired token again revokes the whole family, which also
//! cuts off the access tokens minted in it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Identity, RefreshToken, RefreshTokenState, Role};
use crate::services::{
    AccessTokenClaims, JwtService, RefreshTokenClaims, ServiceError, TokenBlacklist, UserStore,
};

/// Token pair returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[schema(example = 900)]
    pub expires_in: i64,
}

enum RefreshLookup {
    Active(RefreshToken),
    /// The token was already exchanged once.
    Replayed(RefreshToken),
}

#[derive(Clone)]
pub struct TokenIssuer {
    jwt: JwtService,
    store: Arc<dyn UserStore>,
    blacklist: Arc<dyn TokenBlacklist>,
}

impl TokenIssuer {
    pub fn new(
        jwt: JwtService,
        store: Arc<dyn UserStore>,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> Self {
        Self {
            jwt,
            store,
            blacklist,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Start a new session family for `identity`.
    #[tracing::instrument(skip(self, identity), fields(identity_id = %identity.identity_id))]
    pub async fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, ServiceError> {
        let family_id = Uuid::new_v4();
        let (pair, record) = self.mint(identity.identity_id, identity.role, family_id)?;

        self.store.insert_refresh_token(&record).await?;

        tracing::info!(sid = %family_id, jti = %record.token_id, "Session started");
        Ok(pair)
    }

    /// Stateless access-token check: signature, expiry, token kind.
    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.jwt.validate_access_token(token)
    }

    /// Whether the session family has been revoked by logout or replay.
    pub async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        self.blacklist
            .is_session_revoked(session_id)
            .await
            .map_err(ServiceError::Internal)
    }

    /// Full refresh-token check including the persisted record.
    pub async fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, ServiceError> {
        let claims = self.jwt.validate_refresh_token(token)?;
        match self.lookup_refresh(&claims, token).await? {
            RefreshLookup::Active(_) => Ok(claims),
            RefreshLookup::Replayed(_) => Err(ServiceError::TokenRevoked),
        }
    }

    /// Exchange a refresh token for a new pair in the same session family.
    #[tracing::instrument(skip(self, token))]
    pub async fn rotate(&self, token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.jwt.validate_refresh_token(token)?;

        let current = match self.lookup_refresh(&claims, token).await? {
            RefreshLookup::Active(record) => record,
            RefreshLookup::Replayed(record) => {
                tracing::warn!(
                    sid = %record.family_id,
                    jti = %record.token_id,
                    "Refresh token replayed, revoking session"
                );
                self.revoke_session(record.family_id).await?;
                self.store.revoke_refresh_family(record.family_id).await?;
                return Err(ServiceError::TokenRevoked);
            }
        };

        let identity = match self.store.find_by_id(current.identity_id).await? {
            Some(identity) => identity,
            None => {
                self.store.revoke_refresh_family(current.family_id).await?;
                return Err(ServiceError::TokenRevoked);
            }
        };

        let (pair, next) = self.mint(identity.identity_id, identity.role, current.family_id)?;

        if !self
            .store
            .rotate_refresh_token(current.token_id, &next)
            .await?
        {
            // A concurrent request rotated it first.
            return Err(ServiceError::TokenRevoked);
        }

        tracing::info!(
            sid = %current.family_id,
            old_jti = %current.token_id,
            jti = %next.token_id,
            "Refresh token rotated"
        );
        Ok(pair)
    }

    /// Revoke every outstanding session of the identity. Idempotent.
    ///
    /// Every family that could still have a live access token is listed
    /// before the refresh records are retired, so a retry after a failed
    /// listing finishes the job. Returns the number of families whose
    /// refresh tokens were retired by this call.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, identity_id: Uuid) -> Result<usize, ServiceError> {
        let listed = self.store.find_refresh_families(identity_id).await?;
        for family_id in &listed {
            self.revoke_session(*family_id).await?;
        }

        let retired = self.store.revoke_all_refresh_tokens(identity_id).await?;
        // Sessions started between the two store calls.
        for family_id in retired.iter().filter(|f| !listed.contains(f)) {
            self.revoke_session(*family_id).await?;
        }

        tracing::info!(sessions = retired.len(), "Sessions revoked");
        Ok(retired.len())
    }

    async fn revoke_session(&self, family_id: Uuid) -> Result<(), ServiceError> {
        // Listed for as long as an access token from the session can live.
        self.blacklist
            .revoke_session(family_id, self.jwt.access_token_expiry_seconds())
            .await
            .map_err(ServiceError::Internal)
    }

    async fn lookup_refresh(
        &self,
        claims: &RefreshTokenClaims,
        token: &str,
    ) -> Result<RefreshLookup, ServiceError> {
        if let Some(record) = self.store.find_active_refresh_token(claims.jti).await? {
            if record.matches(token) && record.identity_id == claims.sub {
                return Ok(RefreshLookup::Active(record));
            }
            return Err(ServiceError::TokenInvalid);
        }

        let record = self
            .store
            .find_refresh_token(claims.jti)
            .await?
            .ok_or(ServiceError::TokenInvalid)?;

        if !record.matches(token) || record.identity_id != claims.sub {
            return Err(ServiceError::TokenInvalid);
        }

        match record.state {
            RefreshTokenState::Rotated => Ok(RefreshLookup::Replayed(record)),
            RefreshTokenState::Revoked => Err(ServiceError::TokenRevoked),
            RefreshTokenState::Active => Err(ServiceError::TokenExpired),
        }
    }

    fn mint(
        &self,
        identity_id: Uuid,
        role: Role,
        family_id: Uuid,
    ) -> Result<(TokenPair, RefreshToken), ServiceError> {
        let token_id = Uuid::new_v4();
        let access_token = self
            .jwt
            .generate_access_token(identity_id, role, family_id)?;
        let refresh_token = self
            .jwt
            .generate_refresh_token(identity_id, token_id, family_id)?;

        let record = RefreshToken::new(
            token_id,
            identity_id,
            family_id,
            &refresh_token,
            self.jwt.refresh_ttl(),
        );

        let pair = TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        };

        Ok((pair, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::blacklist::testing::FlakyBlacklist;
    use crate::services::{MemoryBlacklist, MemoryStore};

    struct Fixture {
        issuer: TokenIssuer,
        identity: Identity,
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryBlacklist::new())).await
    }

    async fn fixture_with(blacklist: Arc<dyn TokenBlacklist>) -> Fixture {
        let store: Arc<dyn UserStore> = Arc::new(MemoryStore::new());
        let jwt = JwtService::new(&JwtConfig {
            secret: "0123456789abcdef0123456789abcdef".to_string(),
            issuer: "identity-service".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        });
        let identity = Identity::new(
            "a@x.com".to_string(),
            "a".to_string(),
            None,
            "hash".to_string(),
        );
        store.insert(&identity).await.unwrap();

        Fixture {
            issuer: TokenIssuer::new(jwt, store, blacklist),
            identity,
        }
    }

    #[tokio::test]
    async fn test_issue_pair_yields_verifiable_tokens() {
        let f = fixture().await;
        let pair = f.issuer.issue_pair(&f.identity).await.unwrap();

        let access = f.issuer.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, f.identity.identity_id);
        assert_eq!(access.role, Some(Role::User));
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let refresh = f.issuer.verify_refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(refresh.sid, access.sid);
    }

    #[tokio::test]
    async fn test_rotated_token_cannot_be_reused() {
        let f = fixture().await;
        let first = f.issuer.issue_pair(&f.identity).await.unwrap();
        let second = f.issuer.rotate(&first.refresh_token).await.unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert!(matches!(
            f.issuer.rotate(&first.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_replay_revokes_whole_family() {
        let f = fixture().await;
        let first = f.issuer.issue_pair(&f.identity).await.unwrap();
        let second = f.issuer.rotate(&first.refresh_token).await.unwrap();

        let _ = f.issuer.rotate(&first.refresh_token).await;

        assert!(matches!(
            f.issuer.rotate(&second.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        let sid = f.issuer.verify_access(&second.access_token).unwrap().sid;
        assert!(f.issuer.is_session_revoked(sid).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_invalidates_refresh_and_session() {
        let f = fixture().await;
        let pair = f.issuer.issue_pair(&f.identity).await.unwrap();
        let sid = f.issuer.verify_access(&pair.access_token).unwrap().sid;

        assert_eq!(f.issuer.revoke(f.identity.identity_id).await.unwrap(), 1);
        assert!(matches!(
            f.issuer.rotate(&pair.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert!(matches!(
            f.issuer.verify_refresh(&pair.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert!(f.issuer.is_session_revoked(sid).await.unwrap());

        // Second logout is a no-op.
        assert_eq!(f.issuer.revoke(f.identity.identity_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_retry_after_blacklist_failure() {
        let f = fixture_with(Arc::new(FlakyBlacklist::failing(1))).await;
        let pair = f.issuer.issue_pair(&f.identity).await.unwrap();
        let sid = f.issuer.verify_access(&pair.access_token).unwrap().sid;

        assert!(matches!(
            f.issuer.revoke(f.identity.identity_id).await,
            Err(ServiceError::Internal(_))
        ));
        assert!(!f.issuer.is_session_revoked(sid).await.unwrap());

        assert_eq!(f.issuer.revoke(f.identity.identity_id).await.unwrap(), 1);
        assert!(f.issuer.is_session_revoked(sid).await.unwrap());
        assert!(matches!(
            f.issuer.rotate(&pair.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));

        // Already retired families are still relisted on a later call.
        assert_eq!(f.issuer.revoke(f.identity.identity_id).await.unwrap(), 0);
        assert!(f.issuer.is_session_revoked(sid).await.unwrap());
    }

    #[tokio::test]
    async fn test_replay_retry_after_blacklist_failure() {
        let f = fixture_with(Arc::new(FlakyBlacklist::failing(1))).await;
        let first = f.issuer.issue_pair(&f.identity).await.unwrap();
        let second = f.issuer.rotate(&first.refresh_token).await.unwrap();
        let sid = f.issuer.verify_access(&second.access_token).unwrap().sid;

        assert!(matches!(
            f.issuer.rotate(&first.refresh_token).await,
            Err(ServiceError::Internal(_))
        ));
        assert!(matches!(
            f.issuer.rotate(&first.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));

        assert!(f.issuer.is_session_revoked(sid).await.unwrap());
        assert!(matches!(
            f.issuer.rotate(&second.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let f = fixture().await;
        let pair = f.issuer.issue_pair(&f.identity).await.unwrap();

        let attempts = (0..8).map(|_| {
            let issuer = f.issuer.clone();
            let token = pair.refresh_token.clone();
            tokio::spawn(async move { issuer.rotate(&token).await })
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_garbage_refresh_token_is_invalid() {
        let f = fixture().await;
        assert!(matches!(
            f.issuer.rotate("not.a.token").await,
            Err(ServiceError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_unknown_jti_is_invalid() {
        let f = fixture().await;
        let token = f
            .issuer
            .jwt()
            .generate_refresh_token(f.identity.identity_id, Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        assert!(matches!(
            f.issuer.rotate(&token).await,
            Err(ServiceError::TokenInvalid)
        ));
    }
}
