//! Capture session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Consumed,
}

/// A short-lived token correlating a mobile capture attempt with its upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Receipt created from the upload that consumed this session
    pub receipt_id: Option<Uuid>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl CaptureSession {
    /// Status as observed at `now`
    ///
    /// The stored status is never rewritten to `expired`; an active session
    /// past its deadline is reported as expired.
    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if now >= self.expires_at => SessionStatus::Expired,
            status => status,
        }
    }

    pub fn expires_in_seconds(&self) -> i64 {
        (self.expires_at - self.created_at).num_seconds()
    }
}

/// Response for session creation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub expires_in_seconds: i64,
}

impl From<&CaptureSession> for CreateSessionResponse {
    fn from(session: &CaptureSession) -> Self {
        Self {
            session_id: session.session_id,
            status: session.status,
            expires_in_seconds: session.expires_in_seconds(),
        }
    }
}

/// Response for a receipt uploaded through a capture session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUploadResponse {
    pub success: bool,
    pub receipt_id: Uuid,
}
