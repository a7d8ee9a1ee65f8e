//! Common library for the receipt capture services
//!
//! This crate provides the infrastructure shared by the capture API and the
//! outbox relay: PostgreSQL connectivity and migrations, the Redis
//! connection, the extraction outbox, the extraction endpoint client,
//! tracing setup and the error types for all of them.

pub mod cache;
pub mod database;
pub mod error;
pub mod extraction;
pub mod outbox;
pub mod telemetry;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool, health_check, run_migrations};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     run_migrations(&pool).await?;
///     println!("Database health check: {}", health_check(&pool).await);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
