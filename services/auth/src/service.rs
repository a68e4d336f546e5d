//! Authentication service
//!
//! Orchestrates registration, login with lockout, token refresh, logout,
//! email verification and password reset on top of an [`AuthStore`].
//!
//! Failures are reported as [`AuthError`]. Messages for credential failures
//! are deliberately generic so that a caller cannot tell an unknown email
//! from a wrong password.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LockoutPolicy;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{Claims, JwtService, TokenPair, TokenType};
use crate::models::user::normalize_email;
use crate::models::{NewOrganization, NewSession, NewUser, RevokeReason, Session, User, UserStatus};
use crate::password::{CredentialHasher, generate_secure_token};
use crate::repositories::AuthStore;
use crate::validation::{self, PasswordPolicy};

/// Lifetime of a password reset token, in hours
pub const PASSWORD_RESET_TTL_HOURS: i64 = 1;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Registration input
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: Option<String>,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: TokenPair,
    pub session: Session,
}

/// Client metadata recorded on a new session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    jwt: JwtService,
    hasher: CredentialHasher,
    password_policy: PasswordPolicy,
    lockout: LockoutPolicy,
}

impl AuthService {
    /// Create a new service
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt: JwtService,
        hasher: CredentialHasher,
        password_policy: PasswordPolicy,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            jwt,
            hasher,
            password_policy,
            lockout,
        }
    }

    /// Register a new, unverified account.
    ///
    /// The returned user carries the verification token so the caller can
    /// dispatch it.
    pub async fn register(&self, input: RegisterInput) -> AuthResult<User> {
        let email = normalize_email(&input.email);

        validation::validate_email(&email).map_err(|e| invalid("email", e))?;
        validation::validate_name("First name", &input.first_name)
            .map_err(|e| invalid("first_name", e))?;
        validation::validate_name("Last name", &input.last_name)
            .map_err(|e| invalid("last_name", e))?;
        validation::validate_password(&input.password, &self.password_policy)
            .map_err(|e| invalid("password", e))?;

        let organization_name = input
            .organization_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        if let Some(name) = organization_name {
            validation::validate_organization_name(name)
                .map_err(|e| invalid("organization_name", e))?;
        }

        // The unique index is the real guard; this only avoids hashing for
        // an obvious duplicate.
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::conflict("Email address already registered"));
        }

        let password_hash = self.hash_password(&input.password).await?;

        let new_user = NewUser {
            email,
            password_hash,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            verification_token: generate_secure_token(),
        };

        let user = self
            .store
            .create_user(new_user, organization_name.map(NewOrganization::named))
            .await?;

        info!(
            user_id = user.id,
            role = %user.role,
            organization_id = ?user.organization_id,
            "Registered new user"
        );

        Ok(user)
    }

    /// Check credentials and open a session.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        let now = Utc::now();

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            // Pay for a hash check anyway so timing does not reveal the miss.
            self.verify_password(password, None).await?;
            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        };

        if user.is_locked_at(now) {
            warn!(user_id = user.id, "Login attempt on locked account");
            return Err(AuthError::authentication(
                "Account is temporarily locked due to too many failed login attempts",
            ));
        }

        if !self.verify_password(password, Some(&user.password_hash)).await? {
            let (failed_login_count, locked_until) = self
                .store
                .record_failed_login(user.id, &self.lockout, now)
                .await?;

            if locked_until.is_some_and(|until| until > now) {
                warn!(user_id = user.id, failed_login_count, "Account locked");
            } else {
                warn!(user_id = user.id, failed_login_count, "Failed login attempt");
            }

            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        }

        if user.status != UserStatus::Active {
            return Err(AuthError::authentication("Account is not active"));
        }

        if !user.email_verified {
            return Err(AuthError::authentication(
                "Email address has not been verified",
            ));
        }

        let tokens = self.jwt.issue_pair(&user)?;

        let session = NewSession {
            user_id: user.id,
            session_token: generate_secure_token(),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            expires_at: now + self.jwt.refresh_ttl(),
        };
        let (user, session) = self.store.complete_login(user.id, session, now).await?;

        info!(user_id = user.id, session_id = session.id, "User logged in");

        Ok(LoginOutcome {
            user,
            tokens,
            session,
        })
    }

    /// Exchange a refresh token for a fresh token pair.
    ///
    /// Only the token's signature and expiry are checked; sessions are not
    /// consulted.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.jwt.verify(refresh_token)?;

        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::authentication("Invalid token type"));
        }

        let user = self.active_user(claims.user_id()?).await?;
        let tokens = self.jwt.issue_pair(&user)?;

        info!(user_id = user.id, "Refreshed tokens");
        Ok(tokens)
    }

    /// Claims of a valid access token
    pub fn authorize(&self, access_token: &str) -> AuthResult<Claims> {
        let claims = self.jwt.verify(access_token)?;

        if claims.token_type != TokenType::Access {
            return Err(AuthError::authentication("Invalid token type"));
        }

        // Reject a subject that is not a user id before any handler sees it.
        claims.user_id()?;
        Ok(claims)
    }

    /// Revoke one session, or every active session when no token is given.
    ///
    /// Returns the number of sessions revoked; zero is still a success.
    pub async fn logout(&self, user_id: i64, session_token: Option<&str>) -> AuthResult<u64> {
        let revoked = self
            .store
            .revoke_sessions(user_id, session_token, RevokeReason::UserLogout, Utc::now())
            .await?;

        info!(user_id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Consume a verification token, activating the account.
    pub async fn verify_email(&self, token: &str) -> AuthResult<User> {
        let user = self
            .store
            .verify_email(token, Utc::now())
            .await?
            .ok_or_else(|| AuthError::not_found("Invalid or already used verification token"))?;

        info!(user_id = user.id, "Email verified");
        Ok(user)
    }

    /// Issue a password reset token valid for [`PASSWORD_RESET_TTL_HOURS`].
    ///
    /// Fails with NotFound for an unknown email. HTTP callers must hide that
    /// distinction.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<User> {
        let email = normalize_email(email);

        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| AuthError::not_found("User not found"))?;

        let token = generate_secure_token();
        let user = self
            .store
            .set_password_reset(user.id, &token, Utc::now() + Duration::hours(PASSWORD_RESET_TTL_HOURS))
            .await?;

        info!(user_id = user.id, "Password reset requested");
        Ok(user)
    }

    /// Replace the password using a reset token and revoke all sessions.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<User> {
        let now = Utc::now();

        let user = self
            .store
            .find_user_by_reset_token(token)
            .await?
            .ok_or_else(|| AuthError::not_found("Invalid reset token"))?;

        if !user.password_reset_expires.is_some_and(|expires| expires > now) {
            self.store.clear_password_reset(user.id).await?;
            warn!(user_id = user.id, "Expired password reset token discarded");
            return Err(invalid("token", "Reset token has expired"));
        }

        validation::validate_password(new_password, &self.password_policy)
            .map_err(|e| invalid("new_password", e))?;

        let password_hash = self.hash_password(new_password).await?;

        let (user, revoked) = self
            .store
            .reset_password(token, &password_hash, now)
            .await?
            .ok_or_else(|| AuthError::not_found("Invalid reset token"))?;

        info!(user_id = user.id, revoked, "Password reset completed");
        Ok(user)
    }

    /// The authenticated user's profile
    pub async fn current_user(&self, user_id: i64) -> AuthResult<User> {
        self.active_user(user_id).await
    }

    /// The user's live sessions, newest first
    pub async fn list_sessions(&self, user_id: i64) -> AuthResult<Vec<Session>> {
        Ok(self
            .store
            .list_active_sessions(user_id, Utc::now())
            .await?)
    }

    /// Access token lifetime in seconds, as reported to clients
    pub fn access_token_expires_in(&self) -> i64 {
        self.jwt.access_ttl().num_seconds()
    }

    async fn active_user(&self, user_id: i64) -> AuthResult<User> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::authentication("User not found"))?;

        if !user.is_active_user() {
            return Err(AuthError::authentication("Account is not active"));
        }

        Ok(user)
    }

    async fn hash_password(&self, password: &str) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::internal(format!("Password hashing task failed: {e}")))??;

        Ok(hash)
    }

    /// Without a stored hash the check runs against a decoy and always fails.
    async fn verify_password(&self, password: &str, hash: Option<&str>) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = hash.map(str::to_string);

        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&password, &hash),
            None => hasher.verify_decoy(&password),
        })
            .await
            .map_err(|e| AuthError::internal(format!("Password verification task failed: {e}")))
    }
}

fn invalid(field: &str, message: impl Into<String>) -> AuthError {
    AuthError::Validation {
        message: message.into(),
        details: json!({ "field": field }),
    }
}
