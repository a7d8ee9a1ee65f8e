//! Relay configuration

use std::str::FromStr;

use anyhow::{Result, bail};

/// Outbox relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Cron expression (with seconds) driving relay runs
    pub schedule: String,
    /// Intents claimed per run
    pub batch_size: i64,
    /// Delivery attempts before an intent is dead-lettered
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_cap_seconds: u64,
    /// How long a claimed intent is hidden from other relays
    pub lease_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            schedule: "0/5 * * * * *".to_string(), // every 5 seconds
            batch_size: 10,
            max_attempts: 8,
            backoff_base_seconds: 5,
            backoff_cap_seconds: 300,
            lease_seconds: 120,
        }
    }
}

impl RelayConfig {
    /// Create a new RelayConfig from environment variables
    ///
    /// # Environment Variables
    /// - `RELAY_SCHEDULE`: cron schedule (default: "0/5 * * * * *")
    /// - `RELAY_BATCH_SIZE`: intents per run (default: 10)
    /// - `RELAY_MAX_ATTEMPTS`: attempts before dead-lettering (default: 8)
    /// - `RELAY_BACKOFF_BASE_SECONDS`: first retry delay (default: 5)
    /// - `RELAY_BACKOFF_CAP_SECONDS`: longest retry delay (default: 300)
    /// - `RELAY_LEASE_SECONDS`: claim lease (default: 120)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            schedule: std::env::var("RELAY_SCHEDULE").unwrap_or(defaults.schedule),
            batch_size: env_or("RELAY_BATCH_SIZE", defaults.batch_size),
            max_attempts: env_or("RELAY_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base_seconds: env_or("RELAY_BACKOFF_BASE_SECONDS", defaults.backoff_base_seconds),
            backoff_cap_seconds: env_or("RELAY_BACKOFF_CAP_SECONDS", defaults.backoff_cap_seconds),
            lease_seconds: env_or("RELAY_LEASE_SECONDS", defaults.lease_seconds),
        };

        if config.batch_size < 1 {
            bail!("RELAY_BATCH_SIZE must be at least 1");
        }
        if config.max_attempts < 1 {
            bail!("RELAY_MAX_ATTEMPTS must be at least 1");
        }
        if config.backoff_cap_seconds < config.backoff_base_seconds {
            bail!("RELAY_BACKOFF_CAP_SECONDS cannot be lower than RELAY_BACKOFF_BASE_SECONDS");
        }

        Ok(config)
    }
}

impl RelayConfig {
    /// Fail unless a claimed batch can be delivered before its lease runs out
    ///
    /// Deliveries within a batch are sequential, so the worst case is every
    /// request running into `delivery_timeout_seconds`.
    pub fn ensure_lease_covers(&self, delivery_timeout_seconds: u64) -> Result<()> {
        let worst_case = (self.batch_size as u64).saturating_mul(delivery_timeout_seconds);
        if self.lease_seconds < worst_case {
            bail!(
                "RELAY_LEASE_SECONDS ({}) must cover RELAY_BATCH_SIZE ({}) deliveries of up to {}s each",
                self.lease_seconds,
                self.batch_size,
                delivery_timeout_seconds
            );
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
