//! Receipt repository for database operations

use async_trait::async_trait;
use chrono::Duration;
use common::{
    error::{DatabaseError, DatabaseResult},
    extraction::ExtractionRequest,
    outbox::OutboxRepository,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::models::receipt::{NewReceipt, Receipt, ReceiptStatus};

/// Durable receipt storage
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Insert a receipt and return the persisted row with its generated id
    ///
    /// The insert is atomic: either the row exists afterwards or an error is
    /// returned.
    async fn create_pending(&self, new_receipt: &NewReceipt) -> DatabaseResult<Receipt>;

    /// Find a receipt by ID
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Receipt>>;
}

/// PostgreSQL receipt repository
///
/// Every receipt is written together with its extraction outbox intent.
#[derive(Clone)]
pub struct ReceiptRepository {
    pool: PgPool,
    outbox_grace: Duration,
}

impl ReceiptRepository {
    /// Create a new receipt repository
    pub fn new(pool: PgPool, outbox_grace: Duration) -> Self {
        Self { pool, outbox_grace }
    }
}

const RECEIPT_COLUMNS: &str = "id, image_original_path, status, source, created_at, updated_at, \
     merchant_name, transaction_date, total_amount, subtotal_amount, tax_amount";

fn receipt_from_row(row: &PgRow) -> DatabaseResult<Receipt> {
    let status: String = row.try_get("status").map_err(DatabaseError::Query)?;
    let status = status
        .parse::<ReceiptStatus>()
        .map_err(|e| DatabaseError::Query(sqlx::Error::Decode(e.into())))?;

    Ok(Receipt {
        id: row.try_get("id").map_err(DatabaseError::Query)?,
        image_path: row
            .try_get("image_original_path")
            .map_err(DatabaseError::Query)?,
        status,
        source: row.try_get("source").map_err(DatabaseError::Query)?,
        created_at: row.try_get("created_at").map_err(DatabaseError::Query)?,
        updated_at: row.try_get("updated_at").map_err(DatabaseError::Query)?,
        merchant_name: row.try_get("merchant_name").map_err(DatabaseError::Query)?,
        transaction_date: row
            .try_get("transaction_date")
            .map_err(DatabaseError::Query)?,
        total_amount: row.try_get("total_amount").map_err(DatabaseError::Query)?,
        subtotal_amount: row
            .try_get("subtotal_amount")
            .map_err(DatabaseError::Query)?,
        tax_amount: row.try_get("tax_amount").map_err(DatabaseError::Query)?,
    })
}

#[async_trait]
impl ReceiptStore for ReceiptRepository {
    async fn create_pending(&self, new_receipt: &NewReceipt) -> DatabaseResult<Receipt> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::Connection)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO receipts (image_original_path, status, source)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            RECEIPT_COLUMNS
        ))
        .bind(&new_receipt.image_path)
        .bind(new_receipt.status.as_str())
        .bind(&new_receipt.source)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::Query)?;

        let receipt = receipt_from_row(&row)?;

        let request = ExtractionRequest {
            receipt_id: receipt.id,
            image_url: receipt.image_path.clone(),
        };
        let outbox_id = OutboxRepository::enqueue(&mut tx, &request, self.outbox_grace).await?;

        tx.commit().await.map_err(DatabaseError::Query)?;

        info!(receipt_id = %receipt.id, outbox_id, "Receipt and extraction intent persisted");
        Ok(receipt)
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Receipt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM receipts WHERE id = $1",
            RECEIPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(receipt_from_row).transpose()
    }
}
