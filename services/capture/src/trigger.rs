//! Fire-and-forget extraction trigger

use common::{
    extraction::{ExtractionClient, ExtractionRequest},
    outbox::OutboxRepository,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// The trigger could not even be handed off
#[derive(Error, Debug)]
pub enum TriggerDispatchError {
    #[error("No async runtime available to dispatch extraction: {0}")]
    NoRuntime(String),
}

/// Signals that a receipt is ready for extraction
///
/// `dispatch` must return without waiting for the extraction to start.
pub trait ExtractionTrigger: Send + Sync {
    fn dispatch(&self, request: ExtractionRequest) -> Result<(), TriggerDispatchError>;
}

/// Calls the extraction endpoint from a detached task
///
/// On success the receipt's outbox intent is marked delivered; on failure
/// the intent stays pending and the outbox relay retries it.
#[derive(Clone)]
pub struct HttpExtractionTrigger {
    client: ExtractionClient,
    outbox: OutboxRepository,
}

impl HttpExtractionTrigger {
    pub fn new(client: ExtractionClient, outbox: OutboxRepository) -> Self {
        Self { client, outbox }
    }
}

impl ExtractionTrigger for HttpExtractionTrigger {
    fn dispatch(&self, request: ExtractionRequest) -> Result<(), TriggerDispatchError> {
        let handle = Handle::try_current().map_err(|e| TriggerDispatchError::NoRuntime(e.to_string()))?;

        let client = self.client.clone();
        let outbox = self.outbox.clone();

        handle.spawn(async move {
            if let Err(e) = client.request_extraction(&request).await {
                warn!(
                    receipt_id = %request.receipt_id,
                    error = %e,
                    "Extraction request failed, leaving it to the outbox relay"
                );
                return;
            }

            match outbox.mark_delivered(request.receipt_id).await {
                Ok(true) => info!(receipt_id = %request.receipt_id, "Extraction intent delivered"),
                Ok(false) => info!(receipt_id = %request.receipt_id, "Extraction intent was already delivered"),
                Err(e) => error!(
                    receipt_id = %request.receipt_id,
                    error = %e,
                    "Failed to mark extraction intent delivered"
                ),
            }
        });

        Ok(())
    }
}
