//! PostgreSQL implementation of the auth store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AuthStore, StoreError, StoreResult};
use crate::config::LockoutPolicy;
use crate::models::{
    NewOrganization, NewSession, NewUser, RevokeReason, Session, Timestamps, User, UserRole,
};

const USER_COLUMNS: &str = "id, uuid, email, password_hash, first_name, last_name, full_name, \
     role, status, email_verified, email_verified_at, verification_token, password_reset_token, \
     password_reset_expires, password_changed_at, failed_login_count, locked_until, \
     last_login_at, organization_id, avatar_url, created_at, updated_at, deleted_at";

const SESSION_COLUMNS: &str = "id, user_id, session_token, ip_address, user_agent, expires_at, \
     is_active, revoked_reason, revoked_at, created_at, updated_at";

/// Auth store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    /// Create a new store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user_where(&self, predicate: &str, value: &str) -> StoreResult<Option<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {predicate} = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Find or create the organization by name and count the new member.
    ///
    /// Returns the organization id and whether this call created it.
    async fn join_organization(
        tx: &mut Transaction<'_, Postgres>,
        organization: &NewOrganization,
    ) -> StoreResult<(i64, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO organizations (uuid, name, slug)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) WHERE deleted_at IS NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&organization.name)
        .bind(&organization.slug)
        .fetch_optional(&mut **tx)
        .await?;

        let (id, created) = match inserted {
            Some(row) => (row.try_get::<i64, _>("id")?, true),
            None => {
                let row = sqlx::query(
                    "SELECT id FROM organizations WHERE name = $1 AND deleted_at IS NULL",
                )
                .bind(&organization.name)
                .fetch_one(&mut **tx)
                .await?;
                (row.try_get::<i64, _>("id")?, false)
            }
        };

        sqlx::query(
            "UPDATE organizations SET user_count = user_count + 1, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok((id, created))
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user_where("lower(email)", email).await
    }

    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_reset_token(&self, token: &str) -> StoreResult<Option<User>> {
        self.find_user_where("password_reset_token", token).await
    }

    async fn create_user(
        &self,
        new_user: NewUser,
        organization: Option<NewOrganization>,
    ) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        let (organization_id, role) = match &organization {
            Some(organization) => {
                let (id, created) = Self::join_organization(&mut tx, organization).await?;
                if created {
                    info!(organization_id = id, name = %organization.name, "Created organization");
                }
                (Some(id), UserRole::for_membership(created))
            }
            None => (None, UserRole::User),
        };

        let query = format!(
            r#"
            INSERT INTO users (uuid, email, password_hash, first_name, last_name, full_name,
                               role, verification_token, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(new_user.full_name())
            .bind(role.as_str())
            .bind(&new_user.verification_token)
            .bind(organization_id)
            .fetch_one(&mut *tx)
            .await?;

        let user = user_from_row(&row)?;
        tx.commit().await?;

        Ok(user)
    }

    async fn record_failed_login(
        &self,
        user_id: i64,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<(i32, Option<DateTime<Utc>>)> {
        // Every expression reads the row as it is when the update applies, so
        // racing failures queue on the row lock instead of overwriting each other.
        let row = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = CASE
                    WHEN locked_until <= $2 THEN 1
                    ELSE failed_login_count + 1
                END,
                locked_until = CASE
                    WHEN $3 > 0
                         AND (CASE WHEN locked_until <= $2 THEN 1 ELSE failed_login_count + 1 END) >= $3
                        THEN $4
                    WHEN locked_until <= $2 THEN NULL
                    ELSE locked_until
                END,
                updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING failed_login_count, locked_until
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(policy.max_failed_attempts)
        .bind(now + Duration::minutes(policy.lockout_minutes))
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("failed_login_count")?, row.try_get("locked_until")?))
    }

    async fn complete_login(
        &self,
        user_id: i64,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<(User, Session)> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            UPDATE users
            SET failed_login_count = 0, locked_until = NULL, last_login_at = $2, updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );

        let user_row = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        let query = format!(
            r#"
            INSERT INTO user_sessions (user_id, session_token, ip_address, user_agent, expires_at,
                                       created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session_row = sqlx::query(&query)
            .bind(session.user_id)
            .bind(&session.session_token)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        let user = user_from_row(&user_row)?;
        let session = session_from_row(&session_row)?;
        tx.commit().await?;

        Ok((user, session))
    }

    async fn verify_email(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<User>> {
        let query = format!(
            r#"
            UPDATE users
            SET email_verified = TRUE, email_verified_at = $2, status = 'active',
                verification_token = NULL, updated_at = $2
            WHERE verification_token = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_password_reset(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let query = format!(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;

        user_from_row(&row)
    }

    async fn clear_password_reset(&self, user_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = NULL, password_reset_expires = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, u64)>> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            UPDATE users
            SET password_hash = $2, password_reset_token = NULL, password_reset_expires = NULL,
                password_changed_at = $3, updated_at = $3
            WHERE password_reset_token = $1 AND password_reset_expires > $3
              AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(token)
            .bind(password_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let user = user_from_row(&row)?;

        let revoked = revoke_all(&mut tx, user.id, RevokeReason::PasswordReset, now).await?;
        tx.commit().await?;

        debug!(user_id = user.id, revoked, "Password replaced");
        Ok(Some((user, revoked)))
    }

    async fn revoke_sessions(
        &self,
        user_id: i64,
        session_token: Option<&str>,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        match session_token {
            Some(token) => {
                let result = sqlx::query(
                    r#"
                    UPDATE user_sessions
                    SET is_active = FALSE, revoked_reason = $3, revoked_at = $4, updated_at = $4
                    WHERE user_id = $1 AND session_token = $2 AND is_active
                    "#,
                )
                .bind(user_id)
                .bind(token)
                .bind(reason.as_str())
                .bind(now)
                .execute(&self.pool)
                .await?;

                Ok(result.rows_affected())
            }
            None => {
                let mut tx = self.pool.begin().await?;
                let revoked = revoke_all(&mut tx, user_id, reason, now).await?;
                tx.commit().await?;
                Ok(revoked)
            }
        }
    }

    async fn list_active_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM user_sessions
            WHERE user_id = $1 AND is_active AND expires_at > $2
            ORDER BY created_at DESC, id DESC
            "#
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(session_from_row).collect()
    }
}

async fn revoke_all(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    reason: RevokeReason,
    now: DateTime<Utc>,
) -> StoreResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE user_sessions
        SET is_active = FALSE, revoked_reason = $2, revoked_at = $3, updated_at = $3
        WHERE user_id = $1 AND is_active
        "#,
    )
    .bind(user_id)
    .bind(reason.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(User {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        full_name: row.try_get("full_name")?,
        role: role.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        status: status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        email_verified: row.try_get("email_verified")?,
        email_verified_at: row.try_get("email_verified_at")?,
        verification_token: row.try_get("verification_token")?,
        password_reset_token: row.try_get("password_reset_token")?,
        password_reset_expires: row.try_get("password_reset_expires")?,
        password_changed_at: row.try_get("password_changed_at")?,
        failed_login_count: row.try_get("failed_login_count")?,
        locked_until: row.try_get("locked_until")?,
        last_login_at: row.try_get("last_login_at")?,
        organization_id: row.try_get("organization_id")?,
        avatar_url: row.try_get("avatar_url")?,
        timestamps: Timestamps {
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        },
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    let revoked_reason: Option<String> = row.try_get("revoked_reason")?;

    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_token: row.try_get("session_token")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        expires_at: row.try_get("expires_at")?,
        is_active: row.try_get("is_active")?,
        revoked_reason: revoked_reason
            .map(|r| r.parse::<RevokeReason>())
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        revoked_at: row.try_get("revoked_at")?,
        timestamps: Timestamps {
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        },
    })
}
