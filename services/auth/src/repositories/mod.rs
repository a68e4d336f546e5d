//! Persistence for users, organizations and sessions
//!
//! The [`AuthStore`] trait is the seam between the service and storage.
//! [`PgAuthStore`] is the production implementation; [`MemoryAuthStore`]
//! keeps everything in process and backs the test suites.
//!
//! Every method that writes more than one row is atomic, and every method
//! that consumes a single-use token does so with a conditional write so that
//! two concurrent consumers cannot both succeed.

mod memory;
mod postgres;

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::LockoutPolicy;
use crate::models::{NewOrganization, NewSession, NewUser, RevokeReason, Session, User};

/// Storage error
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; carries the constraint name
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored value could not be mapped back onto the domain model
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match flow_common::error::unique_violation(&err) {
            Some(constraint) => StoreError::Conflict(constraint),
            None => StoreError::Database(err),
        }
    }
}

/// Type alias for store results
pub type StoreResult<T> = Result<T, StoreError>;

/// User directory and session ledger
///
/// Email arguments are expected to be normalised already. Soft-deleted users
/// are invisible to every lookup.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>>;

    async fn find_user_by_reset_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Insert a user, joining or creating `organization` by name.
    ///
    /// The creator of an organization becomes its admin and anyone joining an
    /// existing one a plain user. Fails with [`StoreError::Conflict`] when the
    /// email is already taken.
    async fn create_user(
        &self,
        new_user: NewUser,
        organization: Option<NewOrganization>,
    ) -> StoreResult<User>;

    /// Count one more failed password check, locking the account once
    /// `policy` says so.
    ///
    /// The increment is applied to the stored row in a single write, so
    /// concurrent failures are all counted. Returns the new
    /// `(failed_login_count, locked_until)`.
    async fn record_failed_login(
        &self,
        user_id: i64,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<(i32, Option<DateTime<Utc>>)>;

    /// Reset failure tracking, stamp `last_login_at` and open a session, atomically.
    async fn complete_login(
        &self,
        user_id: i64,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<(User, Session)>;

    /// Consume a verification token, marking the user verified and active.
    ///
    /// Returns `None` when no user holds the token.
    async fn verify_email(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<User>>;

    /// Store a password reset token, replacing any previous one.
    async fn set_password_reset(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<User>;

    /// Drop any pending password reset token.
    async fn clear_password_reset(&self, user_id: i64) -> StoreResult<()>;

    /// Consume an unexpired reset token: replace the password hash, clear the
    /// token and revoke every active session of the user, atomically.
    ///
    /// Returns the updated user and the number of sessions revoked, or `None`
    /// when the token is unknown or expired.
    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, u64)>>;

    /// Revoke one session (by token) or all active sessions of a user.
    ///
    /// Returns the number of sessions that were active and are now revoked.
    async fn revoke_sessions(
        &self,
        user_id: i64,
        session_token: Option<&str>,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Active, unexpired sessions of a user, newest first.
    async fn list_active_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;
}
