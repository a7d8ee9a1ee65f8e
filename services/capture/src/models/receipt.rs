//! Receipt models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extraction status of a receipt
///
/// Receipts are created `pending`; every later transition belongs to the
/// extraction worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Processing => "processing",
            ReceiptStatus::Done => "done",
            ReceiptStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "processing" => Ok(ReceiptStatus::Processing),
            "done" => Ok(ReceiptStatus::Done),
            "failed" => Ok(ReceiptStatus::Failed),
            other => Err(format!("Unknown receipt status: {}", other)),
        }
    }
}

/// Provenance tag for receipts created from an uploaded image
pub const SOURCE_UPLOAD: &str = "upload";

/// Receipt entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub image_path: String,
    pub status: ReceiptStatus,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merchant_name: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub subtotal_amount: Option<f64>,
    pub tax_amount: Option<f64>,
}

/// New receipt creation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReceipt {
    pub image_path: String,
    pub status: ReceiptStatus,
    pub source: String,
}

impl NewReceipt {
    /// A pending receipt for an image that has already been uploaded
    pub fn from_upload(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            status: ReceiptStatus::Pending,
            source: SOURCE_UPLOAD.to_string(),
        }
    }
}

/// Request for registering an already-uploaded receipt image
#[derive(Debug, Deserialize)]
pub struct UploadReceiptRequest {
    pub image_url: Option<String>,
    /// Client-side timing measurements, logged as-is
    pub client_timings: Option<serde_json::Value>,
}

/// Response for receipt registration
#[derive(Debug, Serialize)]
pub struct UploadReceiptResponse {
    pub receipt_id: Uuid,
}
