//! Application state shared across handlers

use std::sync::Arc;

use common::cache::RedisPool;
use sqlx::PgPool;

use crate::{
    ingestion::IngestionCoordinator, repositories::ReceiptStore, session::SessionManager,
    storage::ImageStorage,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub ingestion: IngestionCoordinator,
    pub receipts: Arc<dyn ReceiptStore>,
    pub storage: Arc<dyn ImageStorage>,
    /// Probed by `/health`; absent in tests
    pub db_pool: Option<PgPool>,
    /// Probed by `/health`; absent with the in-memory session store
    pub redis_pool: Option<RedisPool>,
    pub max_upload_bytes: usize,
}
