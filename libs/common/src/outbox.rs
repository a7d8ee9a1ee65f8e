//! Extraction outbox
//!
//! Every receipt row is written together with an outbox intent in the same
//! transaction. The intent is marked delivered once the extraction endpoint
//! accepted it, either by the in-request trigger or by the relay.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::extraction::ExtractionRequest;

/// A row of the `extraction_outbox` table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    pub receipt_id: Uuid,
    pub image_url: String,
    /// Failed delivery attempts so far
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// The payload to send to the extraction endpoint
    pub fn request(&self) -> ExtractionRequest {
        ExtractionRequest {
            receipt_id: self.receipt_id,
            image_url: self.image_url.clone(),
        }
    }
}

/// Outbox repository for database operations
#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    /// Create a new outbox repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an extraction intent on an open connection or transaction
    ///
    /// The relay will not pick the intent up before `grace` has elapsed,
    /// leaving room for the in-request trigger to deliver it first.
    pub async fn enqueue(
        conn: &mut PgConnection,
        request: &ExtractionRequest,
        grace: Duration,
    ) -> DatabaseResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO extraction_outbox (receipt_id, image_url, next_attempt_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(request.receipt_id)
        .bind(&request.image_url)
        .bind(Utc::now() + grace)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(id)
    }

    /// Mark the intent for a receipt as delivered
    ///
    /// Returns `false` when it was already delivered.
    pub async fn mark_delivered(&self, receipt_id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_outbox
            SET delivered_at = NOW()
            WHERE receipt_id = $1 AND delivered_at IS NULL
            "#,
        )
        .bind(receipt_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim up to `limit` undelivered intents that are due
    ///
    /// Claimed rows have their `next_attempt_at` pushed forward by `lease`, so
    /// concurrent relays skip them until the lease runs out.
    pub async fn claim_due(&self, limit: i64, lease: Duration) -> DatabaseResult<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(
            r#"
            UPDATE extraction_outbox
            SET next_attempt_at = NOW() + $2
            WHERE id IN (
                SELECT id FROM extraction_outbox
                WHERE delivered_at IS NULL
                  AND dead_lettered_at IS NULL
                  AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, receipt_id, image_url, attempts, last_error, created_at,
                      next_attempt_at, delivered_at, dead_lettered_at
            "#,
        )
        .bind(limit)
        .bind(lease)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(entries)
    }

    /// Record a failed delivery and schedule the next attempt
    pub async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE extraction_outbox
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Give up on an intent after its final failed attempt
    pub async fn dead_letter(&self, id: i64, error: &str) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE extraction_outbox
            SET attempts = attempts + 1, last_error = $2, dead_lettered_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }
}
