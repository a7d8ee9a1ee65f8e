use std::sync::Arc;

use anyhow::Result;
use aws_config::BehaviorVersion;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod config;
mod error;
mod ingestion;
mod models;
mod repositories;
mod routes;
mod session;
mod state;
mod storage;
mod trigger;

#[cfg(test)]
mod testing;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool, run_migrations},
    extraction::{ExtractionClient, ExtractionConfig},
    outbox::OutboxRepository,
    telemetry::init_tracing,
};

use crate::{
    config::{CaptureConfig, SessionStoreKind},
    ingestion::IngestionCoordinator,
    repositories::{MemorySessionStore, ReceiptRepository, RedisSessionStore, SessionStore},
    session::SessionManager,
    state::AppState,
    storage::{S3ImageStorage, StorageConfig},
    trigger::HttpExtractionTrigger,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("capture")?;

    info!("Starting capture service");

    let config = CaptureConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool).await?;

    // Session registry
    let (session_store, redis_pool): (Arc<dyn SessionStore>, Option<RedisPool>) =
        match config.session_store {
            SessionStoreKind::Redis => {
                let redis_pool = RedisPool::new(&RedisConfig::from_env()).await?;
                info!("Redis session store connected");
                (
                    Arc::new(RedisSessionStore::new(redis_pool.clone())),
                    Some(redis_pool),
                )
            }
            SessionStoreKind::Memory => {
                warn!("Using in-memory session store; sessions are not shared between instances");
                (Arc::new(MemorySessionStore::new()), None)
            }
        };
    let sessions = SessionManager::new(session_store, config.session.clone());

    // Receipts and extraction dispatch
    let receipts = Arc::new(ReceiptRepository::new(
        pool.clone(),
        chrono::Duration::seconds(config.outbox_grace_seconds as i64),
    ));
    let extraction_client = ExtractionClient::new(&ExtractionConfig::from_env())?;
    let trigger = Arc::new(HttpExtractionTrigger::new(
        extraction_client,
        OutboxRepository::new(pool.clone()),
    ));
    let ingestion = IngestionCoordinator::new(receipts.clone(), trigger);

    // Image storage
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let storage_config = StorageConfig::from_env();
    info!(bucket = %storage_config.bucket, "Receipt image storage configured");
    let storage = Arc::new(S3ImageStorage::new(
        aws_sdk_s3::Client::new(&aws_config),
        storage_config,
    ));

    let app_state = AppState {
        sessions,
        ingestion,
        receipts,
        storage,
        db_pool: Some(pool),
        redis_pool,
        max_upload_bytes: config.max_upload_bytes,
    };

    info!("Capture service initialized successfully");

    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Capture service listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
