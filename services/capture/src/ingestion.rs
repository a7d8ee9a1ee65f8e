//! Receipt ingestion
//!
//! Registers an uploaded image as a pending receipt and signals extraction
//! without waiting for it. Two timing checkpoints are logged per receipt: the
//! persistence call and the trigger dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{error::DatabaseError, extraction::ExtractionRequest};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{models::receipt::NewReceipt, repositories::ReceiptStore, trigger::ExtractionTrigger};

/// Error type for receipt ingestion
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Image reference must not be empty")]
    InvalidImageReference,

    /// The receipt row could not be written; nothing was dispatched
    #[error("Failed to persist receipt: {0}")]
    Persistence(#[source] DatabaseError),
}

/// Timing checkpoints of one ingestion
///
/// `started_at <= persisted_at <= dispatched_at` always holds: the absolute
/// timestamps are derived from one monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionTimings {
    pub started_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
    pub dispatched_at: DateTime<Utc>,
    /// Duration of the persistence call
    pub persist_elapsed: Duration,
    /// Time from call start until the trigger was dispatched
    pub dispatch_elapsed: Duration,
}

/// Result of a successful ingestion
#[derive(Debug, Clone)]
pub struct Ingestion {
    pub receipt_id: Uuid,
    pub timings: IngestionTimings,
}

/// Coordinates receipt persistence and extraction dispatch
#[derive(Clone)]
pub struct IngestionCoordinator {
    receipts: Arc<dyn ReceiptStore>,
    trigger: Arc<dyn ExtractionTrigger>,
}

impl IngestionCoordinator {
    pub fn new(receipts: Arc<dyn ReceiptStore>, trigger: Arc<dyn ExtractionTrigger>) -> Self {
        Self { receipts, trigger }
    }

    /// Create a pending receipt for an uploaded image and trigger extraction
    ///
    /// A successful return guarantees the receipt exists in `pending` status,
    /// not that extraction has begun.
    pub async fn create_receipt_and_trigger_extraction(
        &self,
        image_reference: &str,
    ) -> Result<Uuid, IngestionError> {
        Ok(self.ingest(image_reference).await?.receipt_id)
    }

    /// Same as [`Self::create_receipt_and_trigger_extraction`], keeping the
    /// timing checkpoints
    pub async fn ingest(&self, image_reference: &str) -> Result<Ingestion, IngestionError> {
        if image_reference.trim().is_empty() {
            return Err(IngestionError::InvalidImageReference);
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let receipt = self
            .receipts
            .create_pending(&NewReceipt::from_upload(image_reference))
            .await
            .map_err(|e| {
                error!(image_path = image_reference, error = %e, "Failed to persist receipt");
                IngestionError::Persistence(e)
            })?;

        let persist_elapsed = clock.elapsed();
        let persisted_at = offset(started_at, persist_elapsed);
        info!(
            receipt_id = %receipt.id,
            created_at_ms = persisted_at.timestamp_millis(),
            db_insert_ms = persist_elapsed.as_millis() as u64,
            "Receipt row created"
        );

        let request = ExtractionRequest {
            receipt_id: receipt.id,
            image_url: receipt.image_path.clone(),
        };
        if let Err(e) = self.trigger.dispatch(request) {
            warn!(
                receipt_id = %receipt.id,
                error = %e,
                "Extraction trigger not dispatched, leaving it to the outbox relay"
            );
        }

        let dispatch_elapsed = clock.elapsed();
        let dispatched_at = offset(started_at, dispatch_elapsed);
        info!(
            receipt_id = %receipt.id,
            queued_at_ms = dispatched_at.timestamp_millis(),
            dispatch_ms = dispatch_elapsed.as_millis() as u64,
            "Extraction trigger dispatched"
        );

        Ok(Ingestion {
            receipt_id: receipt.id,
            timings: IngestionTimings {
                started_at,
                persisted_at,
                dispatched_at,
                persist_elapsed,
                dispatch_elapsed,
            },
        })
    }
}

fn offset(start: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(elapsed)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(start)
}
