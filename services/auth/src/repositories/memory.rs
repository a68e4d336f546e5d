//! In-process auth store
//!
//! Mirrors the uniqueness rules of the SQL schema so that service and HTTP
//! tests observe the same conflicts as production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuthStore, StoreError, StoreResult};
use crate::config::LockoutPolicy;
use crate::models::{
    NewOrganization, NewSession, NewUser, Organization, RevokeReason, Session, Timestamps, User,
    UserRole, UserStatus,
};

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    organizations: Vec<Organization>,
    sessions: Vec<Session>,
}

impl Tables {
    fn live_user(&self, predicate: impl Fn(&User) -> bool) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.deleted_at.is_none() && predicate(u))
    }

    fn live_user_mut(&mut self, predicate: impl Fn(&User) -> bool) -> Option<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.deleted_at.is_none() && predicate(u))
    }

    fn revoke(
        &mut self,
        user_id: i64,
        session_token: Option<&str>,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut revoked = 0;
        for session in self.sessions.iter_mut().filter(|s| {
            s.user_id == user_id
                && s.is_active
                && session_token.is_none_or(|token| s.session_token == token)
        }) {
            session.is_active = false;
            session.revoked_reason = Some(reason);
            session.revoked_at = Some(now);
            session.timestamps.touch(now);
            revoked += 1;
        }
        revoked
    }

    /// Returns the organization id and whether it was created.
    fn join_organization(&mut self, organization: &NewOrganization, now: DateTime<Utc>) -> (i64, bool) {
        if let Some(existing) = self
            .organizations
            .iter_mut()
            .find(|o| o.deleted_at.is_none() && o.name == organization.name)
        {
            existing.user_count += 1;
            existing.timestamps.touch(now);
            return (existing.id, false);
        }

        let id = self.organizations.len() as i64 + 1;
        self.organizations.push(Organization {
            id,
            uuid: Uuid::new_v4(),
            name: organization.name.clone(),
            slug: organization.slug.clone(),
            user_count: 1,
            timestamps: Timestamps::at(now),
            deleted_at: None,
        });
        (id, true)
    }
}

/// Auth store holding its tables behind an async mutex
#[derive(Debug, Clone, Default)]
pub struct MemoryAuthStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryAuthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session ever opened for `user_id`, revoked ones included
    pub async fn sessions_of(&self, user_id: i64) -> Vec<Session> {
        let tables = self.tables.lock().await;
        tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Organization by name
    pub async fn organization_named(&self, name: &str) -> Option<Organization> {
        let tables = self.tables.lock().await;
        tables
            .organizations
            .iter()
            .find(|o| o.deleted_at.is_none() && o.name == name)
            .cloned()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .live_user(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.live_user(|u| u.id == id).cloned())
    }

    async fn find_user_by_reset_token(&self, token: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .live_user(|u| u.password_reset_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create_user(
        &self,
        new_user: NewUser,
        organization: Option<NewOrganization>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let email = new_user.email.to_lowercase();
        if tables.live_user(|u| u.email.to_lowercase() == email).is_some() {
            return Err(StoreError::Conflict("uq_users_email".to_string()));
        }
        if tables
            .users
            .iter()
            .any(|u| u.verification_token.as_deref() == Some(new_user.verification_token.as_str()))
        {
            return Err(StoreError::Conflict(
                "uq_users_verification_token".to_string(),
            ));
        }

        let (organization_id, role) = match &organization {
            Some(organization) => {
                let (id, created) = tables.join_organization(organization, now);
                (Some(id), UserRole::for_membership(created))
            }
            None => (None, UserRole::User),
        };

        let user = User {
            id: tables.users.len() as i64 + 1,
            uuid: Uuid::new_v4(),
            full_name: Some(new_user.full_name()),
            email: new_user.email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            role,
            status: UserStatus::Pending,
            email_verified: false,
            email_verified_at: None,
            verification_token: Some(new_user.verification_token),
            password_reset_token: None,
            password_reset_expires: None,
            password_changed_at: None,
            failed_login_count: 0,
            locked_until: None,
            last_login_at: None,
            organization_id,
            avatar_url: None,
            timestamps: Timestamps::at(now),
            deleted_at: None,
        };

        tables.users.push(user.clone());
        Ok(user)
    }

    async fn record_failed_login(
        &self,
        user_id: i64,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<(i32, Option<DateTime<Utc>>)> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .live_user_mut(|u| u.id == user_id)
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))?;

        let (failed_login_count, locked_until) =
            policy.register_failure(user.failed_login_count, user.locked_until, now);
        user.failed_login_count = failed_login_count;
        user.locked_until = locked_until;
        user.timestamps.touch(now);

        Ok((failed_login_count, locked_until))
    }

    async fn complete_login(
        &self,
        user_id: i64,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<(User, Session)> {
        let mut tables = self.tables.lock().await;

        if tables
            .sessions
            .iter()
            .any(|s| s.session_token == session.session_token)
        {
            return Err(StoreError::Conflict("uq_user_sessions_token".to_string()));
        }

        let user = tables
            .live_user_mut(|u| u.id == user_id)
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))?;
        user.failed_login_count = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.timestamps.touch(now);
        let user = user.clone();

        let session = Session {
            id: tables.sessions.len() as i64 + 1,
            user_id: session.user_id,
            session_token: session.session_token,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            expires_at: session.expires_at,
            is_active: true,
            revoked_reason: None,
            revoked_at: None,
            timestamps: Timestamps::at(now),
        };
        tables.sessions.push(session.clone());

        Ok((user, session))
    }

    async fn verify_email(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;

        Ok(tables
            .live_user_mut(|u| u.verification_token.as_deref() == Some(token))
            .map(|user| {
                user.email_verified = true;
                user.email_verified_at = Some(now);
                user.status = UserStatus::Active;
                user.verification_token = None;
                user.timestamps.touch(now);
                user.clone()
            }))
    }

    async fn set_password_reset(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;

        if tables
            .users
            .iter()
            .any(|u| u.id != user_id && u.password_reset_token.as_deref() == Some(token))
        {
            return Err(StoreError::Conflict(
                "uq_users_password_reset_token".to_string(),
            ));
        }

        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))?;
        user.password_reset_token = Some(token.to_string());
        user.password_reset_expires = Some(expires_at);
        user.timestamps.touch(Utc::now());

        Ok(user.clone())
    }

    async fn clear_password_reset(&self, user_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.iter_mut().find(|u| u.id == user_id) {
            user.password_reset_token = None;
            user.password_reset_expires = None;
            user.timestamps.touch(Utc::now());
        }
        Ok(())
    }

    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, u64)>> {
        let mut tables = self.tables.lock().await;

        let Some(user) = tables.live_user_mut(|u| {
            u.password_reset_token.as_deref() == Some(token)
                && u.password_reset_expires.is_some_and(|expires| expires > now)
        }) else {
            return Ok(None);
        };

        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.password_changed_at = Some(now);
        user.timestamps.touch(now);
        let user = user.clone();

        let revoked = tables.revoke(user.id, None, RevokeReason::PasswordReset, now);
        Ok(Some((user, revoked)))
    }

    async fn revoke_sessions(
        &self,
        user_id: i64,
        session_token: Option<&str>,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.revoke(user_id, session_token, reason, now))
    }

    async fn list_active_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_live_at(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.timestamps
                .created_at
                .cmp(&a.timestamps.created_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str, token: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            verification_token: token.to_string(),
        }
    }

    fn new_session(user_id: i64, token: &str, now: DateTime<Utc>) -> NewSession {
        NewSession {
            user_id,
            session_token: token.to_string(),
            ip_address: None,
            user_agent: None,
            expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let store = MemoryAuthStore::new();
        store.create_user(new_user("a@x.com", "t1"), None).await.unwrap();

        let err = store
            .create_user(new_user("A@X.com", "t2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(c) if c == "uq_users_email"));
    }

    #[tokio::test]
    async fn duplicate_verification_token_conflicts() {
        let store = MemoryAuthStore::new();
        store.create_user(new_user("a@x.com", "same"), None).await.unwrap();

        let err = store
            .create_user(new_user("b@x.com", "same"), Some(NewOrganization::named("Acme")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(c) if c == "uq_users_verification_token"));
        assert!(store.organization_named("Acme").await.is_none());
    }

    #[tokio::test]
    async fn failed_logins_accumulate_on_the_stored_row() {
        let store = MemoryAuthStore::new();
        let user = store.create_user(new_user("a@x.com", "t"), None).await.unwrap();
        let policy = LockoutPolicy::default();
        let now = Utc::now();

        for expected in 1..=4 {
            let (count, locked_until) = store
                .record_failed_login(user.id, &policy, now)
                .await
                .unwrap();
            assert_eq!(count, expected);
            assert!(locked_until.is_none());
        }

        let (count, locked_until) = store
            .record_failed_login(user.id, &policy, now)
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(locked_until, Some(now + Duration::minutes(30)));

        let stored = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.is_locked_at(now));
    }

    #[tokio::test]
    async fn organization_creator_is_admin_and_joiner_is_user() {
        let store = MemoryAuthStore::new();
        let founder = store
            .create_user(new_user("a@x.com", "t1"), Some(NewOrganization::named("Acme")))
            .await
            .unwrap();
        let joiner = store
            .create_user(new_user("b@x.com", "t2"), Some(NewOrganization::named("Acme")))
            .await
            .unwrap();

        assert_eq!(founder.role, UserRole::Admin);
        assert_eq!(joiner.role, UserRole::User);
        assert_eq!(founder.organization_id, joiner.organization_id);
        assert_eq!(store.organization_named("Acme").await.unwrap().user_count, 2);
    }

    #[tokio::test]
    async fn verification_token_is_single_use() {
        let store = MemoryAuthStore::new();
        store.create_user(new_user("a@x.com", "tok"), None).await.unwrap();

        let now = Utc::now();
        let user = store.verify_email("tok", now).await.unwrap().unwrap();
        assert!(user.email_verified);
        assert_eq!(user.status, UserStatus::Active);
        assert!(store.verify_email("tok", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_one_or_all_sessions() {
        let store = MemoryAuthStore::new();
        let user = store.create_user(new_user("a@x.com", "t"), None).await.unwrap();
        let now = Utc::now();

        for token in ["s1", "s2", "s3"] {
            store
                .complete_login(user.id, new_session(user.id, token, now), now)
                .await
                .unwrap();
        }

        let revoked = store
            .revoke_sessions(user.id, Some("s1"), RevokeReason::UserLogout, now)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        assert_eq!(store.list_active_sessions(user.id, now).await.unwrap().len(), 2);

        let revoked = store
            .revoke_sessions(user.id, None, RevokeReason::UserLogout, now)
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        assert!(store.list_active_sessions(user.id, now).await.unwrap().is_empty());

        // Already revoked sessions stay untouched.
        let revoked = store
            .revoke_sessions(user.id, None, RevokeReason::UserLogout, now)
            .await
            .unwrap();
        assert_eq!(revoked, 0);
        assert_eq!(store.sessions_of(user.id).await.len(), 3);
    }

    #[tokio::test]
    async fn reset_password_requires_unexpired_token() {
        let store = MemoryAuthStore::new();
        let user = store.create_user(new_user("a@x.com", "t"), None).await.unwrap();
        let now = Utc::now();

        store
            .set_password_reset(user.id, "reset", now - Duration::minutes(1))
            .await
            .unwrap();
        assert!(
            store
                .reset_password("reset", "new-hash", now)
                .await
                .unwrap()
                .is_none()
        );

        store
            .set_password_reset(user.id, "reset", now + Duration::hours(1))
            .await
            .unwrap();
        let (updated, _) = store
            .reset_password("reset", "new-hash", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert!(updated.password_reset_token.is_none());
        assert_eq!(updated.password_changed_at, Some(now));
    }
}
