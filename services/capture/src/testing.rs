//! In-memory doubles of the service's collaborators, for tests

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::{DatabaseError, DatabaseResult},
    extraction::ExtractionRequest,
};
use uuid::Uuid;

use crate::{
    models::receipt::{NewReceipt, Receipt},
    repositories::ReceiptStore,
    storage::{ImageStorage, StorageError},
    trigger::{ExtractionTrigger, TriggerDispatchError},
};

/// Receipt store keeping rows in a vector; optionally failing every insert
#[derive(Default)]
pub struct InMemoryReceiptStore {
    rows: Mutex<Vec<Receipt>>,
    fail_inserts: bool,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            rows: Mutex::default(),
            fail_inserts: true,
        }
    }

    pub fn rows(&self) -> Vec<Receipt> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn create_pending(&self, new_receipt: &NewReceipt) -> DatabaseResult<Receipt> {
        if self.fail_inserts {
            return Err(DatabaseError::Connection(sqlx::Error::PoolTimedOut));
        }

        let now = Utc::now();
        let receipt = Receipt {
            id: Uuid::new_v4(),
            image_path: new_receipt.image_path.clone(),
            status: new_receipt.status,
            source: new_receipt.source.clone(),
            created_at: now,
            updated_at: now,
            merchant_name: None,
            transaction_date: None,
            total_amount: None,
            subtotal_amount: None,
            tax_amount: None,
        };

        self.rows.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Receipt>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|receipt| receipt.id == id).cloned())
    }
}

/// Trigger recording every dispatch; optionally refusing them
#[derive(Default)]
pub struct RecordingTrigger {
    dispatched: Mutex<Vec<ExtractionRequest>>,
    refuse: bool,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            dispatched: Mutex::default(),
            refuse: true,
        }
    }

    pub fn dispatched(&self) -> Vec<ExtractionRequest> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl ExtractionTrigger for RecordingTrigger {
    fn dispatch(&self, request: ExtractionRequest) -> Result<(), TriggerDispatchError> {
        if self.refuse {
            return Err(TriggerDispatchError::NoRuntime("refused by test".to_string()));
        }
        self.dispatched.lock().unwrap().push(request);
        Ok(())
    }
}

/// Image storage returning `https://store/{name}`; optionally failing
#[derive(Default)]
pub struct InMemoryImageStorage {
    stored: Mutex<Vec<(String, usize)>>,
    fail: bool,
}

impl InMemoryImageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            stored: Mutex::default(),
            fail: true,
        }
    }

    /// Names and sizes of stored images
    pub fn stored(&self) -> Vec<(String, usize)> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageStorage for InMemoryImageStorage {
    async fn store(
        &self,
        original_name: &str,
        _content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        if self.fail {
            return Err(StorageError::Upload("bucket unavailable".to_string()));
        }
        self.stored
            .lock()
            .unwrap()
            .push((original_name.to_string(), bytes.len()));
        Ok(format!("https://store/{}", original_name))
    }
}
