//! Common library for the Flow platform services
//!
//! This crate provides shared functionality used across the services,
//! including database connectivity, database error classification and the
//! tracing bootstrap.

pub mod database;
pub mod error;
pub mod telemetry;

/// Example usage of the database module
///
/// ```rust,no_run
/// use flow_common::database::{DatabaseConfig, init_pool, health_check};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     let is_healthy = health_check(&pool).await?;
///     println!("Database health check: {}", is_healthy);
///     Ok(())
/// }
/// ```
pub use database::{DatabaseConfig, health_check, init_pool};
