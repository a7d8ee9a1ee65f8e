//! Capture session management
//!
//! Owns the whole session lifecycle: creation with a fixed TTL, lookup,
//! at-most-once consumption by an upload, binding of the resulting receipt,
//! and release of a claim when the upload failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    models::session::{CaptureSession, SessionStatus},
    repositories::{SessionStore, SessionStoreError},
};

/// Error type for session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Identifier generation or registry write failed while creating
    #[error("Failed to create capture session: {0}")]
    Creation(String),

    #[error("Session store error: {0}")]
    Store(#[from] SessionStoreError),

    #[error("Session {0} not found")]
    NotFound(Uuid),

    #[error("Session {0} has expired")]
    Expired(Uuid),

    #[error("Session {0} has already been consumed")]
    AlreadyConsumed(Uuid),

    #[error("Session {0} has not been consumed")]
    NotConsumed(Uuid),
}

/// Session manager for capture sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager over an injected store
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Create and register a new active session
    pub async fn create_session(&self) -> Result<CaptureSession, SessionError> {
        let session_id = generate_session_id()?;
        let created_at = Utc::now();

        let session = CaptureSession {
            session_id,
            status: SessionStatus::Active,
            created_at,
            expires_at: created_at + chrono::Duration::seconds(self.config.ttl_seconds() as i64),
            receipt_id: None,
            consumed_at: None,
        };

        self.store
            .put(&session, self.retention_from(&session, created_at))
            .await
            .map_err(|e| SessionError::Creation(e.to_string()))?;

        info!(
            session_id = %session.session_id,
            expires_at = %session.expires_at,
            "Capture session created"
        );
        Ok(session)
    }

    /// Get a session with its status resolved against the current time
    pub async fn get_session(&self, session_id: Uuid) -> Result<CaptureSession, SessionError> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))?;

        session.status = session.status_at(Utc::now());
        Ok(session)
    }

    /// Consume an active session on behalf of an upload
    ///
    /// At most one caller succeeds per session, across every instance sharing
    /// the store.
    pub async fn consume_session(&self, session_id: Uuid) -> Result<CaptureSession, SessionError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))?;

        let now = Utc::now();
        match session.status_at(now) {
            SessionStatus::Active => {}
            // A consumption without a receipt is only binding while its claim
            // is held; the claim below decides.
            SessionStatus::Consumed if session.receipt_id.is_none() && now < session.expires_at => {}
            SessionStatus::Consumed => return Err(SessionError::AlreadyConsumed(session_id)),
            SessionStatus::Expired => return Err(SessionError::Expired(session_id)),
        }

        let retention = self.retention_from(&session, now);
        if !self.store.claim(session_id, retention).await? {
            return Err(SessionError::AlreadyConsumed(session_id));
        }

        let consumed = CaptureSession {
            status: SessionStatus::Consumed,
            consumed_at: Some(now),
            ..session
        };
        if let Err(e) = self.store.put(&consumed, retention).await {
            if let Err(release_err) = self.store.release(session_id).await {
                error!(session_id = %session_id, error = %release_err, "Failed to release session claim");
            }
            return Err(e.into());
        }

        info!(session_id = %session_id, "Capture session consumed");
        Ok(consumed)
    }

    /// Record the receipt created by the upload that consumed the session
    pub async fn bind_receipt(
        &self,
        session_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<CaptureSession, SessionError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))?;

        if session.status != SessionStatus::Consumed {
            return Err(SessionError::NotConsumed(session_id));
        }

        let bound = CaptureSession {
            receipt_id: Some(receipt_id),
            ..session
        };
        self.store
            .put(&bound, self.retention_from(&bound, Utc::now()))
            .await?;

        info!(session_id = %session_id, receipt_id = %receipt_id, "Receipt bound to capture session");
        Ok(bound)
    }

    /// Return a consumed session to `active` after its upload failed
    ///
    /// Sessions that already carry a receipt are left untouched.
    pub async fn release_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        let Some(session) = self.store.get(session_id).await? else {
            warn!(session_id = %session_id, "Release requested for unknown session");
            return Ok(());
        };

        if session.status != SessionStatus::Consumed || session.receipt_id.is_some() {
            return Ok(());
        }

        // Freeing the claim first keeps the session consumable even if the
        // record below cannot be rewritten.
        self.store.release(session_id).await?;

        let reopened = CaptureSession {
            status: SessionStatus::Active,
            consumed_at: None,
            ..session
        };
        self.store
            .put(&reopened, self.retention_from(&reopened, Utc::now()))
            .await?;

        info!(session_id = %session_id, "Capture session released");
        Ok(())
    }

    /// How long the store should keep the session from `now`
    fn retention_from(&self, session: &CaptureSession, now: DateTime<Utc>) -> Duration {
        let keep_until =
            session.expires_at + chrono::Duration::seconds(self.config.retention_seconds as i64);
        (keep_until - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Draw a v4 UUID from the OS entropy source
fn generate_session_id() -> Result<Uuid, SessionError> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::Creation(format!("Entropy source unavailable: {}", e)))?;

    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
}
