//! Service configuration
//!
//! Settings are read from the environment once at startup and passed by value
//! to the components that need them.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use flow_common::telemetry::LogConfig;
use std::env;

use crate::jwt::JwtConfig;
use crate::password::HasherConfig;
use crate::validation::PasswordPolicy;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deployment environment name reported by the health endpoint
    pub environment: String,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    /// Emit browser security headers on every response
    pub secure_headers: bool,
    /// Emit `Strict-Transport-Security` (only meaningful behind TLS)
    pub enable_hsts: bool,
    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            environment: "development".to_string(),
            cors_origins: Vec::new(),
            secure_headers: true,
            enable_hsts: false,
            run_migrations: true,
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig from environment variables
    ///
    /// # Environment Variables
    /// - `HOST` (default: "0.0.0.0")
    /// - `PORT` (default: 8000)
    /// - `ENVIRONMENT` (default: "development")
    /// - `CORS_ORIGINS`: comma-separated list (default: any origin)
    /// - `SECURE_HEADERS` (default: true)
    /// - `ENABLE_HSTS` (default: false)
    /// - `RUN_MIGRATIONS` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            cors_origins,
            secure_headers: read_flag("SECURE_HEADERS", defaults.secure_headers),
            enable_hsts: read_flag("ENABLE_HSTS", defaults.enable_hsts),
            run_migrations: read_flag("RUN_MIGRATIONS", defaults.run_migrations),
        }
    }

    /// Socket address to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Account lockout policy applied to failed password checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lock; zero or less disables locking
    pub max_failed_attempts: i32,
    /// How long a lock lasts
    pub lockout_minutes: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 30,
        }
    }
}

impl LockoutPolicy {
    /// Create a new LockoutPolicy from environment variables
    ///
    /// # Environment Variables
    /// - `MAX_FAILED_LOGIN_ATTEMPTS` (default: 5)
    /// - `ACCOUNT_LOCKOUT_MINUTES` (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_failed_attempts: env::var("MAX_FAILED_LOGIN_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_failed_attempts),
            lockout_minutes: env::var("ACCOUNT_LOCKOUT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lockout_minutes),
        }
    }

    /// New `(failed_login_count, locked_until)` after one more failed attempt.
    ///
    /// A lock that has already lapsed starts a fresh count.
    pub fn register_failure(
        &self,
        failed_count: i32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> (i32, Option<DateTime<Utc>>) {
        let lapsed = locked_until.is_some_and(|until| until <= now);
        let count = if lapsed { 1 } else { failed_count + 1 };

        if self.max_failed_attempts > 0 && count >= self.max_failed_attempts {
            (count, Some(now + Duration::minutes(self.lockout_minutes)))
        } else if lapsed {
            (count, None)
        } else {
            (count, locked_until)
        }
    }
}

/// Complete service settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub password_policy: PasswordPolicy,
    pub hasher: HasherConfig,
    pub lockout: LockoutPolicy,
    pub log: LogConfig,
}

impl Settings {
    /// Load every section from the environment.
    ///
    /// Fails only when a required value (the JWT secret) is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env(),
            jwt: JwtConfig::from_env()?,
            password_policy: PasswordPolicy::from_env(),
            hasher: HasherConfig::from_env(),
            lockout: LockoutPolicy::from_env(),
            log: LogConfig::from_env(),
        })
    }
}

/// Boolean environment flag; accepts `1/0`, `true/false`, `yes/no` and `on/off`.
pub(crate) fn read_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
