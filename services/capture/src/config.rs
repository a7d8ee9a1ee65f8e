//! Capture service configuration

use std::str::FromStr;

use anyhow::Result;

/// Which backend holds capture sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreKind {
    /// Shared between instances, expiry enforced by key TTL
    Redis,
    /// Process-local; for development and single-instance deployments
    Memory,
}

impl FromStr for SessionStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(SessionStoreKind::Redis),
            "memory" => Ok(SessionStoreKind::Memory),
            other => Err(format!("Unknown session store: {}", other)),
        }
    }
}

/// Seconds a capture session stays usable after creation
pub const SESSION_TTL_SECONDS: u64 = 900; // 15 minutes

/// Capture session lifetime settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    ttl_seconds: u64,
    /// Seconds an expired or consumed session stays readable before it
    /// disappears from the store (default: 300)
    pub retention_seconds: u64,
}

impl SessionConfig {
    pub fn new(retention_seconds: u64) -> Self {
        Self {
            ttl_seconds: SESSION_TTL_SECONDS,
            retention_seconds,
        }
    }

    /// Session lifetime; always [`SESSION_TTL_SECONDS`] outside tests
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Sessions with a shortened lifetime, for expiry tests
    #[cfg(test)]
    pub fn expiring_after(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(300) // 5 minutes
    }
}

/// Capture service configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    pub session: SessionConfig,
    pub session_store: SessionStoreKind,
    /// Seconds the relay leaves a fresh outbox intent to the in-request trigger
    pub outbox_grace_seconds: u64,
    /// Largest accepted request body, in bytes
    pub max_upload_bytes: usize,
}

impl CaptureConfig {
    /// Create a new CaptureConfig from environment variables
    ///
    /// # Environment Variables
    /// - `CAPTURE_BIND_ADDR`: listen address (default: "0.0.0.0:3001")
    /// - `CAPTURE_SESSION_RETENTION_SECONDS`: post-expiry retention (default: 300)
    /// - `SESSION_STORE`: `redis` or `memory` (default: redis)
    /// - `OUTBOX_GRACE_SECONDS`: relay grace period (default: 30)
    /// - `CAPTURE_MAX_UPLOAD_BYTES`: body limit (default: 10 MiB)
    pub fn from_env() -> Result<Self> {
        let defaults = SessionConfig::default();

        let bind_addr =
            std::env::var("CAPTURE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

        let retention_seconds =
            env_or("CAPTURE_SESSION_RETENTION_SECONDS", defaults.retention_seconds);

        let session_store = std::env::var("SESSION_STORE")
            .unwrap_or_else(|_| "redis".to_string())
            .parse::<SessionStoreKind>()
            .map_err(|e| anyhow::anyhow!(e))?;

        let outbox_grace_seconds = env_or("OUTBOX_GRACE_SECONDS", 30);
        let max_upload_bytes = env_or("CAPTURE_MAX_UPLOAD_BYTES", 10 * 1024 * 1024);

        Ok(CaptureConfig {
            bind_addr,
            session: SessionConfig::new(retention_seconds),
            session_store,
            outbox_grace_seconds,
            max_upload_bytes,
        })
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
