use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use uuid::Uuid;

/// Revocation list for session families.
///
/// Access tokens are verified without a store lookup, so logging out cannot
/// invalidate them directly. Instead the session id (`sid` claim) is listed
/// here until the last access token of that session would have expired.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn revoke_session(&self, session_id: Uuid, expiry_seconds: i64)
        -> Result<(), anyhow::Error>;
    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn session_key(session_id: Uuid) -> String {
    format!("revoked_session:{}", session_id)
}

#[derive(Clone)]
pub struct RedisBlacklist {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisBlacklist {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl TokenBlacklist for RedisBlacklist {
    async fn revoke_session(
        &self,
        session_id: Uuid,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();

        redis::cmd("SET")
            .arg(session_key(session_id))
            .arg("revoked")
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke session: {}", e))
    }

    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();

        let exists: bool = redis::cmd("EXISTS")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check revoked session: {}", e))?;

        Ok(exists)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process revocation list. Expired entries are dropped on lookup and
/// swept whenever a new session is revoked.
#[derive(Default)]
pub struct MemoryBlacklist {
    revoked: DashMap<Uuid, Instant>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MemoryBlacklist {
    async fn revoke_session(
        &self,
        session_id: Uuid,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let now = Instant::now();
        self.revoked.retain(|_, expires_at| *expires_at > now);

        let ttl = Duration::from_secs(expiry_seconds.max(1) as u64);
        self.revoked.insert(session_id, now + ttl);
        Ok(())
    }

    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error> {
        let expires_at = match self.revoked.get(&session_id) {
            Some(entry) => *entry,
            None => return Ok(false),
        };

        if Instant::now() < expires_at {
            return Ok(true);
        }

        self.revoked.remove(&session_id);
        Ok(false)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
