//! Capture session storage
//!
//! Sessions live in a key-value store with TTL so that every capture service
//! instance sees the same registry. Each session has two keys: the session
//! record itself and a claim marker written with set-if-absent, which makes
//! consumption atomic across instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{cache::RedisPool, error::CacheError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::session::CaptureSession;

/// Error type for session store operations
#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("Session cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value registry of capture sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write a session, replacing any previous record, kept for `ttl`
    async fn put(&self, session: &CaptureSession, ttl: Duration) -> Result<(), SessionStoreError>;

    /// Read a session; `None` once its key has expired
    async fn get(&self, session_id: Uuid) -> Result<Option<CaptureSession>, SessionStoreError>;

    /// Atomically claim a session
    ///
    /// Returns `true` for exactly one caller until the claim is released or
    /// `ttl` elapses.
    async fn claim(&self, session_id: Uuid, ttl: Duration) -> Result<bool, SessionStoreError>;

    /// Drop a claim so the session can be claimed again
    async fn release(&self, session_id: Uuid) -> Result<(), SessionStoreError>;
}

fn session_key(session_id: Uuid) -> String {
    format!("capture_session:{}", session_id)
}

fn claim_key(session_id: Uuid) -> String {
    format!("capture_session:{}:claim", session_id)
}

/// Redis expirations are whole seconds and must be positive
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Redis-backed session store
#[derive(Clone)]
pub struct RedisSessionStore {
    redis_pool: RedisPool,
}

impl RedisSessionStore {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &CaptureSession, ttl: Duration) -> Result<(), SessionStoreError> {
        let value = serde_json::to_string(session)?;
        self.redis_pool
            .set(
                &session_key(session.session_id),
                &value,
                Some(ttl_seconds(ttl)),
            )
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<CaptureSession>, SessionStoreError> {
        match self.redis_pool.get(&session_key(session_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn claim(&self, session_id: Uuid, ttl: Duration) -> Result<bool, SessionStoreError> {
        let claimed = self
            .redis_pool
            .set_nx(&claim_key(session_id), "1", ttl_seconds(ttl))
            .await?;
        Ok(claimed)
    }

    async fn release(&self, session_id: Uuid) -> Result<(), SessionStoreError> {
        self.redis_pool.delete(&claim_key(session_id)).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryEntry {
    session: CaptureSession,
    evict_at: Instant,
}

/// In-process session store
///
/// Entries are evicted lazily when read after their TTL. Sessions are not
/// shared between service instances.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, MemoryEntry>>>,
    claims: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &CaptureSession, ttl: Duration) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            session.session_id,
            MemoryEntry {
                session: session.clone(),
                evict_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<CaptureSession>, SessionStoreError> {
        let mut sessions = self.sessions.lock().await;

        match sessions.get(&session_id) {
            Some(entry) if Instant::now() >= entry.evict_at => {
                sessions.remove(&session_id);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.session.clone())),
            None => Ok(None),
        }
    }

    async fn claim(&self, session_id: Uuid, ttl: Duration) -> Result<bool, SessionStoreError> {
        let mut claims = self.claims.lock().await;
        let now = Instant::now();

        if let Some(until) = claims.get(&session_id) {
            if now < *until {
                return Ok(false);
            }
        }

        claims.insert(session_id, now + ttl);
        Ok(true)
    }

    async fn release(&self, session_id: Uuid) -> Result<(), SessionStoreError> {
        self.claims.lock().await.remove(&session_id);
        Ok(())
    }
}
