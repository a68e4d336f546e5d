//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::Timestamps;
use super::user::UnknownVariant;

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    UserLogout,
    PasswordReset,
    Expired,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::UserLogout => "user_logout",
            RevokeReason::PasswordReset => "password_reset",
            RevokeReason::Expired => "expired",
        }
    }
}

impl FromStr for RevokeReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_logout" => Ok(RevokeReason::UserLogout),
            "password_reset" => Ok(RevokeReason::PasswordReset),
            "expired" => Ok(RevokeReason::Expired),
            other => Err(UnknownVariant {
                kind: "revoke reason",
                value: other.to_string(),
            }),
        }
    }
}

/// Session entity
///
/// A row per login event. Rows are never deleted and an inactive session is
/// never re-activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_reason: Option<RevokeReason>,
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Session {
    /// Active and not yet expired at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// New session creation payload
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub session_token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}
