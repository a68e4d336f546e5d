//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::config::read_flag;

/// Characters accepted as "special" by the password policy.
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Upper bound shared by every policy; keeps hashing cost bounded.
const PASSWORD_MAX_LENGTH: usize = 100;
const NAME_MAX_LENGTH: usize = 100;
const ORGANIZATION_NAME_MAX_LENGTH: usize = 200;

/// Password strength policy
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special: true,
        }
    }
}

impl PasswordPolicy {
    /// Create a new PasswordPolicy from environment variables
    ///
    /// # Environment Variables
    /// - `PASSWORD_MIN_LENGTH` (default: 8)
    /// - `PASSWORD_REQUIRE_UPPERCASE`, `PASSWORD_REQUIRE_LOWERCASE`,
    ///   `PASSWORD_REQUIRE_NUMBERS`, `PASSWORD_REQUIRE_SPECIAL` (default: true)
    pub fn from_env() -> Self {
        Self {
            min_length: std::env::var("PASSWORD_MIN_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            require_uppercase: read_flag("PASSWORD_REQUIRE_UPPERCASE", true),
            require_lowercase: read_flag("PASSWORD_REQUIRE_LOWERCASE", true),
            require_numbers: read_flag("PASSWORD_REQUIRE_NUMBERS", true),
            require_special: read_flag("PASSWORD_REQUIRE_SPECIAL", true),
        }
    }
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a first or last name
pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(format!("{field} is required"));
    }

    if trimmed.chars().count() > NAME_MAX_LENGTH {
        return Err(format!(
            "{field} must be at most {NAME_MAX_LENGTH} characters long"
        ));
    }

    Ok(())
}

/// Validate an organization name supplied at registration
pub fn validate_organization_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("Organization name must not be blank".to_string());
    }

    if trimmed.chars().count() > ORGANIZATION_NAME_MAX_LENGTH {
        return Err(format!(
            "Organization name must be at most {ORGANIZATION_NAME_MAX_LENGTH} characters long"
        ));
    }

    Ok(())
}

/// Validate password against the configured policy
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Result<(), String> {
    let length = password.chars().count();

    if length < policy.min_length {
        return Err(format!(
            "Password must be at least {} characters long",
            policy.min_length
        ));
    }

    if length > PASSWORD_MAX_LENGTH {
        return Err(format!(
            "Password must be at most {PASSWORD_MAX_LENGTH} characters long"
        ));
    }

    if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }

    if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
        return Err("Password must contain at least one lowercase letter".to_string());
    }

    if policy.require_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_string());
    }

    if policy.require_special && !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        return Err("Password must contain at least one special character".to_string());
    }

    Ok(())
}
