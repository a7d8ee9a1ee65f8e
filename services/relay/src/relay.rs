//! Outbox relay
//!
//! Periodically claims extraction intents that the in-request trigger did not
//! deliver, sends them to the extraction endpoint and records the outcome.
//! Failed deliveries are retried with exponential backoff until they are
//! dead-lettered. Delivery is at-least-once.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{
    error::{DatabaseResult, ExtractionError},
    extraction::{ExtractionClient, ExtractionRequest},
    outbox::{OutboxEntry, OutboxRepository},
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;

/// Where undelivered extraction intents are read from and written back to
#[async_trait]
pub trait OutboxSource: Send + Sync {
    async fn claim_due(&self, limit: i64, lease: Duration) -> DatabaseResult<Vec<OutboxEntry>>;
    async fn mark_delivered(&self, receipt_id: Uuid) -> DatabaseResult<bool>;
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DatabaseResult<()>;
    async fn dead_letter(&self, id: i64, error: &str) -> DatabaseResult<()>;
}

#[async_trait]
impl OutboxSource for OutboxRepository {
    async fn claim_due(&self, limit: i64, lease: Duration) -> DatabaseResult<Vec<OutboxEntry>> {
        OutboxRepository::claim_due(self, limit, lease).await
    }

    async fn mark_delivered(&self, receipt_id: Uuid) -> DatabaseResult<bool> {
        OutboxRepository::mark_delivered(self, receipt_id).await
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        OutboxRepository::record_failure(self, id, error, next_attempt_at).await
    }

    async fn dead_letter(&self, id: i64, error: &str) -> DatabaseResult<()> {
        OutboxRepository::dead_letter(self, id, error).await
    }
}

/// Where extraction requests are delivered
#[async_trait]
pub trait ExtractionSink: Send + Sync {
    async fn deliver(&self, request: &ExtractionRequest) -> Result<(), ExtractionError>;
}

#[async_trait]
impl ExtractionSink for ExtractionClient {
    async fn deliver(&self, request: &ExtractionRequest) -> Result<(), ExtractionError> {
        self.request_extraction(request).await
    }
}

/// Outcome counts of one relay run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Delay before retry number `attempts`: `base * 2^(attempts - 1)`, capped
pub fn backoff_delay(attempts: u32, base_seconds: u64, cap_seconds: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempts.saturating_sub(1));
    let seconds = base_seconds.saturating_mul(factor).min(cap_seconds);
    Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1_000))
}

#[derive(Clone)]
pub struct OutboxRelay {
    source: Arc<dyn OutboxSource>,
    sink: Arc<dyn ExtractionSink>,
    config: RelayConfig,
    /// Held for the duration of a scheduled run
    running: Arc<Mutex<()>>,
}

impl OutboxRelay {
    pub fn new(
        source: Arc<dyn OutboxSource>,
        sink: Arc<dyn ExtractionSink>,
        config: RelayConfig,
    ) -> Self {
        Self {
            source,
            sink,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Claim the intents that are due
    pub async fn poll_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let lease = Duration::seconds(self.config.lease_seconds as i64);
        let entries = self
            .source
            .claim_due(self.config.batch_size, lease)
            .await?;

        if !entries.is_empty() {
            info!("Claimed {} extraction intents", entries.len());
        }
        Ok(entries)
    }

    /// Deliver claimed intents one by one and record each outcome
    ///
    /// A failure to record an outcome is logged; the intent becomes due again
    /// once its lease runs out.
    pub async fn process_entries(&self, entries: Vec<OutboxEntry>) -> RelayReport {
        let mut report = RelayReport::default();

        for entry in entries {
            match self.sink.deliver(&entry.request()).await {
                Ok(()) => {
                    if let Err(e) = self.source.mark_delivered(entry.receipt_id).await {
                        error!(receipt_id = %entry.receipt_id, error = %e, "Failed to mark intent delivered");
                    }
                    info!(receipt_id = %entry.receipt_id, attempts = entry.attempts + 1, "Extraction intent delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    let attempts = u32::try_from(entry.attempts).unwrap_or(0) + 1;

                    if attempts >= self.config.max_attempts {
                        if let Err(db_err) = self.source.dead_letter(entry.id, &message).await {
                            error!(receipt_id = %entry.receipt_id, error = %db_err, "Failed to dead-letter intent");
                        }
                        error!(
                            receipt_id = %entry.receipt_id,
                            attempts,
                            error = %message,
                            "Extraction intent dead-lettered"
                        );
                        report.dead_lettered += 1;
                    } else {
                        let delay = backoff_delay(
                            attempts,
                            self.config.backoff_base_seconds,
                            self.config.backoff_cap_seconds,
                        );
                        let next_attempt_at = Utc::now()
                            .checked_add_signed(delay)
                            .unwrap_or(DateTime::<Utc>::MAX_UTC);
                        if let Err(db_err) = self
                            .source
                            .record_failure(entry.id, &message, next_attempt_at)
                            .await
                        {
                            error!(receipt_id = %entry.receipt_id, error = %db_err, "Failed to record delivery failure");
                        }
                        warn!(
                            receipt_id = %entry.receipt_id,
                            attempts,
                            retry_in_seconds = delay.num_seconds(),
                            error = %message,
                            "Extraction delivery failed"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        report
    }

    /// One relay pass: claim, then deliver
    pub async fn run_once(&self) -> Result<RelayReport> {
        let entries = self.poll_outbox().await?;
        Ok(self.process_entries(entries).await)
    }

    /// One relay pass, unless the previous pass of this relay is still going
    ///
    /// Returns `None` when the pass was skipped.
    pub async fn run_exclusive(&self) -> Result<Option<RelayReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("Previous outbox relay run still active, skipping");
            return Ok(None);
        };
        self.run_once().await.map(Some)
    }

    /// Schedule relay passes; the returned scheduler must be kept alive
    pub async fn start_polling(&self, schedule: &str) -> Result<JobScheduler> {
        let relay = self.clone();

        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let relay = relay.clone();
            Box::pin(async move {
                match relay.run_exclusive().await {
                    Ok(Some(report)) if report != RelayReport::default() => {
                        info!(
                            delivered = report.delivered,
                            retried = report.retried,
                            dead_lettered = report.dead_lettered,
                            "Outbox relay run finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Failed to poll extraction outbox: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started outbox relay with schedule: {}", schedule);
        Ok(scheduler)
    }
}
