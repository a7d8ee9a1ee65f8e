//! Receipt image storage
//!
//! Uploaded receipt images are written to an S3 bucket under a collision-free,
//! URL-safe key derived from the client's file name.

use std::sync::OnceLock;

use async_trait::async_trait;
use aws_sdk_s3::{Client, primitives::ByteStream};
use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::info;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Error type for image storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to upload receipt image: {0}")]
    Upload(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket receiving receipt images
    pub bucket: String,
    /// Public URL prefix of the bucket; `s3://bucket` is used when unset
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    /// Create a new StorageConfig from environment variables
    ///
    /// # Environment Variables
    /// - `RECEIPTS_BUCKET`: bucket name (default: "receipts")
    /// - `RECEIPTS_PUBLIC_BASE_URL`: public URL prefix (optional)
    pub fn from_env() -> Self {
        let bucket = std::env::var("RECEIPTS_BUCKET").unwrap_or_else(|_| "receipts".to_string());
        let public_base_url = std::env::var("RECEIPTS_PUBLIC_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        Self {
            bucket,
            public_base_url,
        }
    }

    /// URL under which a stored object is reachable
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("s3://{}/{}", self.bucket, key),
        }
    }
}

/// Where uploaded receipt images go
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Store the image and return its public reference
    async fn store(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError>;
}

/// S3-backed image storage
#[derive(Clone)]
pub struct S3ImageStorage {
    s3_client: Client,
    config: StorageConfig,
}

impl S3ImageStorage {
    pub fn new(s3_client: Client, config: StorageConfig) -> Self {
        Self { s3_client, config }
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn store(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let key = build_object_key(original_name);
        info!("Uploading receipt image to S3: {}", key);

        self.s3_client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type.unwrap_or("application/octet-stream"))
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(self.config.public_url(&key))
    }
}

/// Build a unique object key `{unix_ms}-{8 hex}-{base}[.{ext}]`
pub fn build_object_key(original_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    object_key_at(original_name, Utc::now().timestamp_millis(), &suffix[..8])
}

fn object_key_at(original_name: &str, stamp: i64, suffix: &str) -> String {
    let trimmed = original_name.trim();

    let (base_raw, ext_raw) = match trimmed.rfind('.') {
        Some(dot) if dot > 0 && dot < trimmed.len() - 1 => (&trimmed[..dot], &trimmed[dot + 1..]),
        _ => (trimmed, ""),
    };

    let base = match sanitize_segment(base_raw) {
        base if base.is_empty() => "receipt".to_string(),
        base => base,
    };
    let ext: String = sanitize_segment(ext_raw)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();

    if ext.is_empty() {
        format!("{}-{}-{}", stamp, suffix, base)
    } else {
        format!("{}-{}-{}.{}", stamp, suffix, base, ext)
    }
}

/// Reduce a file name segment to lowercase `[a-z0-9._-]`
fn sanitize_segment(value: &str) -> String {
    static UNSAFE_RUN: OnceLock<Regex> = OnceLock::new();
    static DASH_RUN: OnceLock<Regex> = OnceLock::new();

    let unsafe_run = UNSAFE_RUN
        .get_or_init(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("Failed to compile segment regex"));
    let dash_run = DASH_RUN.get_or_init(|| Regex::new(r"-+").expect("Failed to compile dash regex"));

    // Decomposed accents are dropped with the other non-ASCII characters,
    // leaving their base letters.
    let ascii: String = value.nfkd().filter(char::is_ascii).collect();
    let replaced = unsafe_run.replace_all(&ascii, "-");
    let collapsed = dash_run.replace_all(&replaced, "-");

    collapsed.trim_matches('-').to_lowercase()
}
