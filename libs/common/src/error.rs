//! Custom error types for the common library
//!
//! This module defines database-level error types shared by the services,
//! plus helpers for classifying driver errors.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// PostgreSQL SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Returns the violated constraint name when `err` is a unique violation.
///
/// Callers use this to turn a racing insert into a domain conflict instead
/// of trusting a prior existence check.
pub fn unique_violation(err: &SqlxError) -> Option<String> {
    match err {
        SqlxError::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Some(db_err.constraint().unwrap_or("unknown").to_string())
        }
        _ => None,
    }
}
