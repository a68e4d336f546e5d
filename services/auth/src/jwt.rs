//! JWT service for token generation and validation
//!
//! Tokens are signed with HS256 using a shared secret. Access tokens carry the
//! user's identity claims; refresh tokens carry only the subject. Verification
//! checks signature and expiry with zero leeway and nothing else: no
//! revocation list or session lookup is consulted.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TokenError;
use crate::models::{User, UserRole};

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// Access token lifetime in minutes (default: 30)
    pub access_token_expire_minutes: i64,
    /// Refresh token lifetime in days (default: 7)
    pub refresh_token_expire_days: i64,
}

impl JwtConfig {
    /// Configuration with the given secret and default lifetimes
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        }
    }

    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC signing secret (required)
    /// - `JWT_ACCESS_TOKEN_EXPIRE_MINUTES`: Access token lifetime (default: 30)
    /// - `JWT_REFRESH_TOKEN_EXPIRE_DAYS`: Refresh token lifetime (default: 7)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let access_token_expire_minutes = std::env::var("JWT_ACCESS_TOKEN_EXPIRE_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let refresh_token_expire_days = std::env::var("JWT_REFRESH_TOKEN_EXPIRE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        Ok(JwtConfig {
            secret,
            access_token_expire_minutes,
            refresh_token_expire_days,
        })
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_token_expire_minutes", &self.access_token_expire_minutes)
            .field("refresh_token_expire_days", &self.refresh_token_expire_days)
            .finish()
    }
}

/// Token type claim
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User ID
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<i64>,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
}

impl Claims {
    /// Numeric user id carried in `sub`.
    pub fn user_id(&self) -> Result<i64, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Malformed)
    }
}

/// Identity placed in an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: i64,
    pub email: String,
    pub role: UserRole,
    pub organization_id: Option<i64>,
}

impl From<&User> for AccessClaims {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            organization_id: user.organization_id,
        }
    }
}

/// Access/refresh token pair as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        JwtService {
            encoding_key,
            decoding_key,
            validation,
            config,
        }
    }

    /// Sign an access token valid for `ttl`
    pub fn issue_access(&self, claims: &AccessClaims, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            sub: claims.user_id.to_string(),
            token_type: TokenType::Access,
            email: Some(claims.email.clone()),
            role: Some(claims.role),
            org_id: claims.organization_id,
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        self.sign(&claims)
    }

    /// Sign a refresh token valid for `ttl`
    pub fn issue_refresh(&self, user_id: i64, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            token_type: TokenType::Refresh,
            email: None,
            role: None,
            org_id: None,
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        self.sign(&claims)
    }

    /// Issue a fresh access/refresh pair for `user` using the configured lifetimes
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair> {
        let access_token = self.issue_access(&AccessClaims::from(user), self.access_ttl())?;
        let refresh_token = self.issue_refresh(user.id, self.refresh_ttl())?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.access_ttl().num_seconds(),
        })
    }

    /// Check signature and expiry and return the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.config.access_token_expire_minutes)
    }

    /// Refresh token lifetime, also used as session lifetime
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.config.refresh_token_expire_days)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?;
        Ok(token)
    }
}
