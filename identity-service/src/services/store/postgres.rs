//! PostgreSQL store.
//!
//! Uses sqlx runtime queries. Email uniqueness is enforced by a partial
//! unique index over live rows, so a racing duplicate insert fails inside
//! the database rather than in application code.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{StoreError, UserStore};
use crate::models::{
    normalize_email, Identity, OtpRecord, ProfileUpdate, RefreshToken, RefreshTokenState, Role,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        identity_id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        username TEXT NOT NULL,
        display_name TEXT,
        role TEXT NOT NULL CHECK (role IN ('user', 'admin')),
        password_hash TEXT NOT NULL,
        verified BOOLEAN NOT NULL DEFAULT FALSE,
        created_utc TIMESTAMPTZ NOT NULL,
        updated_utc TIMESTAMPTZ NOT NULL,
        deleted_utc TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS identities_live_email_idx
        ON identities (email) WHERE deleted_utc IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS otp_codes (
        otp_id UUID PRIMARY KEY,
        identity_id UUID NOT NULL REFERENCES identities (identity_id),
        code_hash TEXT NOT NULL,
        issued_utc TIMESTAMPTZ NOT NULL,
        expiry_utc TIMESTAMPTZ NOT NULL,
        consumed_utc TIMESTAMPTZ,
        superseded BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS otp_codes_identity_idx
        ON otp_codes (identity_id, issued_utc DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        token_id UUID PRIMARY KEY,
        identity_id UUID NOT NULL REFERENCES identities (identity_id),
        family_id UUID NOT NULL,
        token_hash TEXT NOT NULL,
        issued_utc TIMESTAMPTZ NOT NULL,
        expiry_utc TIMESTAMPTZ NOT NULL,
        state TEXT NOT NULL CHECK (state IN ('active', 'rotated', 'revoked'))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS refresh_tokens_identity_idx
        ON refresh_tokens (identity_id) WHERE state = 'active'
    "#,
];

const IDENTITY_COLUMNS: &str = "identity_id, email, username, display_name, role, password_hash, \
     verified, created_utc, updated_utc, deleted_utc";

const OTP_COLUMNS: &str =
    "otp_id, identity_id, code_hash, issued_utc, expiry_utc, consumed_utc, superseded";

const REFRESH_COLUMNS: &str =
    "token_id, identity_id, family_id, token_hash, issued_utc, expiry_utc, state";

#[derive(sqlx::FromRow)]
struct IdentityRow {
    identity_id: Uuid,
    email: String,
    username: String,
    display_name: Option<String>,
    role: String,
    password_hash: String,
    verified: bool,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    deleted_utc: Option<DateTime<Utc>>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        Ok(Identity {
            identity_id: row.identity_id,
            email: row.email,
            username: row.username,
            display_name: row.display_name,
            role,
            password_hash: row.password_hash,
            verified: row.verified,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            deleted_utc: row.deleted_utc,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OtpRow {
    otp_id: Uuid,
    identity_id: Uuid,
    code_hash: String,
    issued_utc: DateTime<Utc>,
    expiry_utc: DateTime<Utc>,
    consumed_utc: Option<DateTime<Utc>>,
    superseded: bool,
}

impl From<OtpRow> for OtpRecord {
    fn from(row: OtpRow) -> Self {
        OtpRecord {
            otp_id: row.otp_id,
            identity_id: row.identity_id,
            code_hash: row.code_hash,
            issued_utc: row.issued_utc,
            expiry_utc: row.expiry_utc,
            consumed_utc: row.consumed_utc,
            superseded: row.superseded,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefreshRow {
    token_id: Uuid,
    identity_id: Uuid,
    family_id: Uuid,
    token_hash: String,
    issued_utc: DateTime<Utc>,
    expiry_utc: DateTime<Utc>,
    state: String,
}

impl TryFrom<RefreshRow> for RefreshToken {
    type Error = StoreError;

    fn try_from(row: RefreshRow) -> Result<Self, Self::Error> {
        let state: RefreshTokenState = row
            .state
            .parse()
            .map_err(|e: String| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        Ok(RefreshToken {
            token_id: row.token_id,
            identity_id: row.identity_id,
            family_id: row.family_id,
            token_hash: row.token_hash,
            issued_utc: row.issued_utc,
            expiry_utc: row.expiry_utc,
            state,
        })
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Unavailable(anyhow::anyhow!(e))
}

/// PostgreSQL implementation of [`UserStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                db_error(e)
            })?;

        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        tracing::info!("Database schema ready");
        Ok(())
    }

    /// Underlying pool, for queries outside [`UserStore`].
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE identity_id = $1 AND deleted_utc IS NULL"
        ))
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Identity::try_from)
        .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE email = $1 AND deleted_utc IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Identity::try_from)
        .transpose()
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE deleted_utc IS NULL ORDER BY created_utc"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(Identity::try_from)
        .collect()
    }

    async fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        insert_identity_row(&self.pool, identity).await
    }

    async fn insert_with_otp(&self, identity: &Identity, otp: &OtpRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        insert_identity_row(&mut *tx, identity).await?;
        insert_otp_row(&mut *tx, otp).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn update_profile(
        &self,
        identity_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>(&format!(
            "UPDATE identities SET display_name = COALESCE($2, display_name), \
                 username = COALESCE($3, username), updated_utc = NOW() \
             WHERE identity_id = $1 AND deleted_utc IS NULL \
             RETURNING {IDENTITY_COLUMNS}"
        ))
        .bind(identity_id)
        .bind(&update.display_name)
        .bind(&update.username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Identity::try_from)
        .transpose()
    }

    async fn mark_verified(&self, identity_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE identities SET verified = TRUE, updated_utc = NOW() \
             WHERE identity_id = $1 AND deleted_utc IS NULL",
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, identity_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE identities SET deleted_utc = NOW(), updated_utc = NOW() \
             WHERE identity_id = $1 AND deleted_utc IS NULL",
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_active_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
        let row = sqlx::query_as::<_, OtpRow>(&format!(
            "SELECT {OTP_COLUMNS} FROM otp_codes \
             WHERE identity_id = $1 AND consumed_utc IS NULL AND NOT superseded \
                 AND expiry_utc > NOW() \
             ORDER BY issued_utc DESC LIMIT 1"
        ))
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(OtpRecord::from))
    }

    async fn find_latest_otp(&self, identity_id: Uuid) -> Result<Option<OtpRecord>, StoreError> {
        let row = sqlx::query_as::<_, OtpRow>(&format!(
            "SELECT {OTP_COLUMNS} FROM otp_codes WHERE identity_id = $1 \
             ORDER BY issued_utc DESC LIMIT 1"
        ))
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(OtpRecord::from))
    }

    async fn insert_otp(&self, otp: &OtpRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Serialises concurrent regenerations for the same identity.
        sqlx::query("SELECT identity_id FROM identities WHERE identity_id = $1 FOR UPDATE")
            .bind(otp.identity_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            "UPDATE otp_codes SET superseded = TRUE \
             WHERE identity_id = $1 AND consumed_utc IS NULL AND NOT superseded",
        )
        .bind(otp.identity_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        insert_otp_row(&mut *tx, otp).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE otp_codes SET consumed_utc = NOW() \
             WHERE otp_id = $1 AND consumed_utc IS NULL AND NOT superseded \
                 AND expiry_utc > NOW()",
        )
        .bind(otp_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshToken>, StoreError> {
        sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_id = $1"
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(RefreshToken::try_from)
        .transpose()
    }

    async fn find_active_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE token_id = $1 AND state = 'active' AND expiry_utc > NOW()"
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(RefreshToken::try_from)
        .transpose()
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        insert_refresh(&self.pool, token).await
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let rotated = sqlx::query(
            "UPDATE refresh_tokens SET state = 'rotated' \
             WHERE token_id = $1 AND state = 'active'",
        )
        .bind(old_token_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if rotated.rows_affected() != 1 {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        }

        insert_refresh(&mut *tx, new_token).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn revoke_refresh_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked' \
             WHERE family_id = $1 AND state <> 'revoked'",
        )
        .bind(family_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_refresh_tokens(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let families: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE refresh_tokens SET state = 'revoked' \
             WHERE identity_id = $1 AND state = 'active' \
             RETURNING family_id",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let distinct: HashSet<Uuid> = families.into_iter().map(|(id,)| id).collect();
        Ok(distinct.into_iter().collect())
    }

    async fn find_refresh_families(&self, identity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let families: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT family_id FROM refresh_tokens \
             WHERE identity_id = $1 AND expiry_utc > NOW()",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(families.into_iter().map(|(id,)| id).collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                db_error(e)
            })?;
        Ok(())
    }
}

async fn insert_identity_row<'e, E>(executor: E, identity: &Identity) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO identities (identity_id, email, username, display_name, role,
            password_hash, verified, created_utc, updated_utc, deleted_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(identity.identity_id)
    .bind(&identity.email)
    .bind(&identity.username)
    .bind(&identity.display_name)
    .bind(identity.role.as_str())
    .bind(&identity.password_hash)
    .bind(identity.verified)
    .bind(identity.created_utc)
    .bind(identity.updated_utc)
    .bind(identity.deleted_utc)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn insert_otp_row<'e, E>(executor: E, otp: &OtpRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO otp_codes (otp_id, identity_id, code_hash, issued_utc, expiry_utc,
            consumed_utc, superseded)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(otp.otp_id)
    .bind(otp.identity_id)
    .bind(&otp.code_hash)
    .bind(otp.issued_utc)
    .bind(otp.expiry_utc)
    .bind(otp.consumed_utc)
    .bind(otp.superseded)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn insert_refresh<'e, E>(executor: E, token: &RefreshToken) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_id, identity_id, family_id, token_hash, issued_utc,
            expiry_utc, state)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(token.token_id)
    .bind(token.identity_id)
    .bind(token.family_id)
    .bind(&token.token_hash)
    .bind(token.issued_utc)
    .bind(token.expiry_utc)
    .bind(token.state.as_str())
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}
