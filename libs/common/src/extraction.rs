//! HTTP client for the external extraction endpoint
//!
//! The endpoint receives `{"image_url", "receipt_id"}`, runs OCR and field
//! extraction on its own schedule and writes the results back to the receipt.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ExtractionError;

/// Extraction endpoint configuration
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// URL the extraction request is POSTed to
    pub endpoint: String,
    /// Per-request timeout in seconds (default: 10)
    pub timeout_seconds: u64,
}

impl ExtractionConfig {
    /// Create a new ExtractionConfig from environment variables
    ///
    /// # Environment Variables
    /// - `EXTRACTION_ENDPOINT`: extraction URL (default: "http://localhost:8000/api/receipts/extract")
    /// - `EXTRACTION_TIMEOUT_SECONDS`: request timeout (default: 10)
    pub fn from_env() -> Self {
        let endpoint = std::env::var("EXTRACTION_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:8000/api/receipts/extract".to_string());
        let timeout_seconds = std::env::var("EXTRACTION_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            endpoint,
            timeout_seconds,
        }
    }
}

/// Body of an extraction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub receipt_id: Uuid,
    pub image_url: String,
}

/// Client for the extraction endpoint
#[derive(Clone)]
pub struct ExtractionClient {
    client: Client,
    endpoint: String,
}

impl ExtractionClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Ask the extraction endpoint to process a receipt
    ///
    /// Returns once the endpoint accepted the request, not when extraction
    /// finished.
    pub async fn request_extraction(&self, request: &ExtractionRequest) -> Result<(), ExtractionError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(receipt_id = %request.receipt_id, "Extraction request accepted");
        Ok(())
    }
}
