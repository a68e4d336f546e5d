//! Authentication service models

pub mod organization;
pub mod session;
pub mod user;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export for convenience
pub use organization::{NewOrganization, Organization};
pub use session::{NewSession, RevokeReason, Session};
pub use user::{NewUser, User, UserRole, UserStatus};

/// Creation and modification stamps carried by every persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    /// Stamps for a record created at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the record as modified at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
