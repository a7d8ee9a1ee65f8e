//! Redis cache module
//!
//! This module provides a shared multiplexed Redis connection with the small
//! set of commands the capture-session registry needs: get, set with TTL,
//! atomic set-if-absent and delete.

use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

use crate::error::{CacheError, CacheResult};

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        RedisConfig { url }
    }
}

/// Redis connection handle
///
/// Wraps a single multiplexed connection; clones share it.
#[derive(Clone)]
pub struct RedisPool {
    connection: MultiplexedConnection,
}

impl RedisPool {
    /// Open the client and establish the multiplexed connection
    pub async fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone()).map_err(CacheError::Connection)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Connection)?;

        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { connection })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.connection();

        if let Some(ttl) = ttl_seconds {
            let _: () = conn
                .set_ex(key, value, ttl)
                .await
                .map_err(CacheError::Command)?;
        } else {
            let _: () = conn.set(key, value).await.map_err(CacheError::Command)?;
        }

        Ok(())
    }

    /// Set a key only if it does not exist yet, with a TTL
    ///
    /// Returns `true` if this call created the key.
    pub async fn set_nx(&self, key: &str, value: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let mut conn = self.connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;

        Ok(reply.is_some())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await.map_err(CacheError::Command)?;
        Ok(value)
    }

    /// Delete a key from Redis, returning whether it existed
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection();
        let removed: u64 = conn.del(key).await.map_err(CacheError::Command)?;
        Ok(removed > 0)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> bool {
        let mut conn = self.connection();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        matches!(pong.as_deref(), Ok("PONG"))
    }
}
