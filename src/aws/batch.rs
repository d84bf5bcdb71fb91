//! AWS Batch job control via the aegea CLI

use crate::aws::{AwsError, CommandRunner};
use crate::core::StageStatus;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Per-submission resource request, filled from config.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub queue: String,
    pub memory_mb: u64,
    pub vcpus: u64,
    pub docker_image: String,
    pub job_role: String,
    pub storage_gb: u64,
}

/// Shape of a single entry in `aegea batch describe` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobDescription {
    pub status: String,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetail {
    #[serde(default)]
    pub log_stream_name: Option<String>,
}

impl BatchJobDescription {
    /// Map the Batch job state onto a stage status. Queued states
    /// report `Runnable` so the monitor keeps polling.
    pub fn stage_status(&self) -> StageStatus {
        match self.status.as_str() {
            "SUCCEEDED" => StageStatus::Succeeded,
            "FAILED" => StageStatus::Failed,
            "RUNNING" => StageStatus::Running,
            _ => StageStatus::Runnable,
        }
    }

    /// A failure caused by the underlying instance going away, which is
    /// retried rather than surfaced.
    pub fn host_terminated(&self) -> bool {
        self.status == "FAILED"
            && self
                .status_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("Host EC2"))
    }

    pub fn log_stream_name(&self) -> Option<&str> {
        self.container.as_ref()?.log_stream_name.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

/// Batch job submission and inspection.
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Submit a command and return its Batch job id.
    async fn submit(&self, command: &str, options: &SubmitOptions) -> Result<String, AwsError>;

    /// Describe a previously submitted job.
    async fn describe(&self, job_id: &str) -> Result<BatchJobDescription, AwsError>;

    /// Best-effort terminate. Failures are the caller's to log.
    async fn terminate(&self, job_id: &str, reason: &str) -> Result<(), AwsError>;
}

/// `BatchClient` shelling out to `aegea batch`.
pub struct AegeaBatchClient {
    runner: CommandRunner,
    aegea_path: String,
}

impl AegeaBatchClient {
    pub fn new(aegea_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            runner: CommandRunner::new(timeout_secs),
            aegea_path: aegea_path.into(),
        }
    }
}

#[async_trait]
impl BatchClient for AegeaBatchClient {
    async fn submit(&self, command: &str, options: &SubmitOptions) -> Result<String, AwsError> {
        let memory = options.memory_mb.to_string();
        let vcpus = options.vcpus.to_string();
        let storage = format!("/mnt={}", options.storage_gb);
        let args = [
            "batch",
            "submit",
            "--command",
            command,
            "--storage",
            &storage,
            "--volume-type",
            "gp2",
            "--ecr-image",
            &options.docker_image,
            "--memory",
            &memory,
            "--queue",
            &options.queue,
            "--vcpus",
            &vcpus,
            "--job-role",
            &options.job_role,
        ];
        let stdout = self.runner.capture(&self.aegea_path, &args).await?;
        let response: SubmitResponse = serde_json::from_str(&stdout)
            .map_err(|e| AwsError::Parse(format!("aegea submit output: {}", e)))?;
        debug!("Submitted batch job {}", response.job_id);
        Ok(response.job_id)
    }

    async fn describe(&self, job_id: &str) -> Result<BatchJobDescription, AwsError> {
        let stdout = self
            .runner
            .capture(&self.aegea_path, &["batch", "describe", job_id])
            .await?;
        // describe returns a one-element array
        let mut jobs: Vec<BatchJobDescription> = serde_json::from_str(&stdout)
            .map_err(|e| AwsError::Parse(format!("aegea describe output: {}", e)))?;
        jobs.pop()
            .ok_or_else(|| AwsError::Parse(format!("no description returned for {}", job_id)))
    }

    async fn terminate(&self, job_id: &str, reason: &str) -> Result<(), AwsError> {
        self.runner
            .capture(
                &self.aegea_path,
                &["batch", "terminate", job_id, "--reason", reason],
            )
            .await?;
        Ok(())
    }
}
