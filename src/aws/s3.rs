//! S3 access through the `aws s3` CLI

use crate::aws::{AwsError, CommandRunner};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-side view of the sample results bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the object at `s3_path` exists.
    async fn exists(&self, s3_path: &str) -> Result<bool, AwsError>;

    /// Fetch the object body as UTF-8. `Ok(None)` when the object is
    /// absent; `Err` only for transport-level failures.
    async fn get(&self, s3_path: &str) -> Result<Option<String>, AwsError>;

    /// Last-modified timestamp of the object, if it exists.
    async fn modified_at(&self, s3_path: &str) -> Result<Option<DateTime<Utc>>, AwsError>;

    /// Download the object to a local file. Unlike `get`, an absent
    /// object is an error.
    async fn download(&self, s3_path: &str, dest: &Path) -> Result<(), AwsError>;
}

/// Fetch an object with bounded retries, sleeping between attempts.
///
/// `Ok(None)` from the store counts as a retryable miss; the final
/// outcome after `attempts` tries is returned as-is.
pub async fn get_with_retries<S: ObjectStore + ?Sized>(
    store: &S,
    s3_path: &str,
    attempts: usize,
    sleep_secs: u64,
) -> Result<Option<String>, AwsError> {
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
        }
        match store.get(s3_path).await {
            Ok(Some(body)) => return Ok(Some(body)),
            Ok(None) => {
                debug!("Attempt {}: {} not present yet", attempt + 1, s3_path);
                last_err = None;
            }
            Err(e) => {
                warn!("Attempt {}: fetching {} failed: {}", attempt + 1, s3_path, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// `ObjectStore` backed by the `aws` CLI.
pub struct S3CliStore {
    runner: CommandRunner,
    aws_path: String,
}

impl S3CliStore {
    pub fn new(aws_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            runner: CommandRunner::new(timeout_secs),
            aws_path: aws_path.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3CliStore {
    async fn exists(&self, s3_path: &str) -> Result<bool, AwsError> {
        let output = self
            .runner
            .output(&self.aws_path, &["s3", "ls", s3_path])
            .await?;
        // `aws s3 ls` exits 1 with empty output for a missing key
        Ok(output.status.success() && !output.stdout.is_empty())
    }

    async fn get(&self, s3_path: &str) -> Result<Option<String>, AwsError> {
        let output = self
            .runner
            .output(&self.aws_path, &["s3", "cp", s3_path, "-"])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let body = String::from_utf8(output.stdout)
            .map_err(|e| AwsError::Parse(format!("{}: not valid UTF-8: {}", s3_path, e)))?;
        Ok(Some(body))
    }

    async fn modified_at(&self, s3_path: &str) -> Result<Option<DateTime<Utc>>, AwsError> {
        let output = self
            .runner
            .output(&self.aws_path, &["s3", "ls", s3_path])
            .await?;
        if !output.status.success() || output.stdout.is_empty() {
            return Ok(None);
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        // Listing rows start with "YYYY-MM-DD HH:MM:SS"
        let stamp = listing.trim_start().get(..19).ok_or_else(|| {
            AwsError::Parse(format!("listing for {} too short: {:?}", s3_path, listing))
        })?;
        let naive = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| AwsError::Parse(format!("bad timestamp {:?}: {}", stamp, e)))?;
        Ok(Some(DateTime::from_naive_utc_and_offset(naive, Utc)))
    }

    async fn download(&self, s3_path: &str, dest: &Path) -> Result<(), AwsError> {
        let dest = dest
            .to_str()
            .ok_or_else(|| AwsError::Parse(format!("non-UTF-8 destination {:?}", dest)))?;
        self.runner
            .capture(&self.aws_path, &["s3", "cp", s3_path, dest])
            .await?;
        Ok(())
    }
}
