//! Custom error types for the common library
//!
//! These are the failure modes of the shared infrastructure: the PostgreSQL
//! pool, the Redis cache and the extraction endpoint client.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Error type for Redis operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The client could not be created or a connection could not be opened
    #[error("Cache connection error: {0}")]
    Connection(#[source] RedisError),

    /// A command was sent but failed
    #[error("Cache command error: {0}")]
    Command(#[source] RedisError),
}

/// Type alias for Result with CacheError
pub type CacheResult<T> = Result<T, CacheError>;

/// Error type for calls to the extraction endpoint
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The HTTP request could not be sent or timed out
    #[error("Extraction request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Extraction endpoint rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}
