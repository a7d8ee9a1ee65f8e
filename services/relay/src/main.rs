use std::sync::Arc;

use anyhow::Result;
use tracing::info;

mod config;
mod relay;

use common::{
    database::{DatabaseConfig, health_check, init_pool, run_migrations},
    extraction::{ExtractionClient, ExtractionConfig},
    outbox::OutboxRepository,
    telemetry::init_tracing,
};

use crate::{config::RelayConfig, relay::OutboxRelay};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("relay")?;

    info!("Starting extraction outbox relay");

    let config = RelayConfig::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool).await?;

    let extraction_config = ExtractionConfig::from_env();
    config.ensure_lease_covers(extraction_config.timeout_seconds)?;
    let extraction_client = ExtractionClient::new(&extraction_config)?;

    let relay = OutboxRelay::new(
        Arc::new(OutboxRepository::new(pool)),
        Arc::new(extraction_client),
        config.clone(),
    );

    let mut scheduler = relay.start_polling(&config.schedule).await?;

    info!(
        max_attempts = config.max_attempts,
        batch_size = config.batch_size,
        "Extraction outbox relay started successfully"
    );

    // Keep the service running
    tokio::signal::ctrl_c().await?;
    info!("Shutting down extraction outbox relay");
    scheduler.shutdown().await?;

    Ok(())
}
