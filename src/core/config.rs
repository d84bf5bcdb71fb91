//! Monitor configuration loaded from YAML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_aws_path() -> String {
    "aws".to_string()
}

fn default_aegea_path() -> String {
    "aegea".to_string()
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_describe_sample_rate() -> u32 {
    10
}

fn default_queue() -> String {
    "idseq-pipeline-queue".to_string()
}

fn default_himem_queue() -> String {
    "idseq-pipeline-queue-himem".to_string()
}

fn default_memory_mb() -> u64 {
    64_000
}

fn default_vcpus() -> u64 {
    16
}

fn default_storage_gb() -> u64 {
    500
}

fn default_docker_image() -> String {
    "idseq_dag".to_string()
}

fn default_job_role() -> String {
    "idseq-pipeline".to_string()
}

fn default_long_run_alert_hours() -> f64 {
    18.0
}

fn default_finalized_settle_secs() -> i64 {
    60
}

/// Configuration for the monitors and their AWS boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Bucket holding per-sample pipeline outputs
    pub s3_bucket: String,

    /// Path to the aws CLI executable
    #[serde(default = "default_aws_path")]
    pub aws_path: String,

    /// Path to the aegea executable
    #[serde(default = "default_aegea_path")]
    pub aegea_path: String,

    /// Timeout for each subprocess invocation
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// How often the monitor loop sweeps in-progress runs
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// The batch scheduler is described directly on roughly 1 out of
    /// this many polls; marker files cover the rest. 1 means every poll.
    #[serde(default = "default_describe_sample_rate")]
    pub describe_sample_rate: u32,

    /// Stage step numbers allowed to restart automatically after an
    /// unexpected failure. Empty disables automatic restarts.
    #[serde(default)]
    pub auto_restart_stages: Vec<u8>,

    #[serde(default = "default_queue")]
    pub batch_queue: String,

    #[serde(default = "default_himem_queue")]
    pub batch_himem_queue: String,

    #[serde(default = "default_memory_mb")]
    pub batch_memory_mb: u64,

    #[serde(default = "default_vcpus")]
    pub batch_vcpus: u64,

    #[serde(default = "default_storage_gb")]
    pub batch_storage_gb: u64,

    #[serde(default = "default_docker_image")]
    pub docker_image: String,

    #[serde(default = "default_job_role")]
    pub job_role: String,

    /// Runs longer than this get one alert logged
    #[serde(default = "default_long_run_alert_hours")]
    pub long_run_alert_hours: f64,

    /// After finalization, outputs get this long to appear in S3 before
    /// the result monitor gives up on them
    #[serde(default = "default_finalized_settle_secs")]
    pub finalized_settle_secs: i64,

    /// Override for the SQLite database path
    #[serde(default)]
    pub db_path: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        serde_yaml::from_str("s3_bucket: idseq-samples").expect("default config is valid")
    }
}

impl MonitorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: MonitorConfig =
            serde_yaml::from_str(yaml).context("Failed to parse monitor config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.s3_bucket.is_empty(), "s3_bucket must not be empty");
        anyhow::ensure!(
            self.describe_sample_rate >= 1,
            "describe_sample_rate must be at least 1"
        );
        Ok(())
    }
}
