//! Pipeline run stage model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of times a stage job is resubmitted after its host
/// instance was terminated. Past this, manual intervention is required.
pub const MAX_STAGE_RETRIES: usize = 5;

/// Status of one stage's batch job.
///
/// The normal progression is STARTED -> RUNNABLE -> RUNNING ->
/// SUCCEEDED / FAILED, driven by completion marker files in S3 and by
/// the batch scheduler's job description. ERROR marks a transient
/// describe failure; the job is still considered in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Started,
    Runnable,
    Running,
    Succeeded,
    Failed,
    Checked,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Started => "STARTED",
            StageStatus::Runnable => "RUNNABLE",
            StageStatus::Running => "RUNNING",
            StageStatus::Succeeded => "SUCCEEDED",
            StageStatus::Failed => "FAILED",
            StageStatus::Checked => "CHECKED",
            StageStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(StageStatus::Started),
            "RUNNABLE" => Some(StageStatus::Runnable),
            "RUNNING" => Some(StageStatus::Running),
            "SUCCEEDED" => Some(StageStatus::Succeeded),
            "FAILED" => Some(StageStatus::Failed),
            "CHECKED" => Some(StageStatus::Checked),
            "ERROR" => Some(StageStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered phase of a pipeline run.
///
/// Stages execute strictly in `step_number` order; a stage only starts
/// once the prior stage has succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunStage {
    pub step_number: u8,

    /// Human-readable stage name (e.g. "Host Filtering")
    pub name: String,

    /// Short name used when building the stage job command
    pub dag_name: String,

    pub job_status: Option<StageStatus>,

    /// External batch scheduler job id for the current attempt
    pub job_id: Option<String>,

    /// The command submitted to the batch scheduler
    pub job_command: Option<String>,

    /// Log stream name reported by the scheduler, if any
    pub job_log_id: Option<String>,

    /// Comma-joined job ids of prior attempts that failed
    pub failed_jobs: Option<String>,

    pub executed_at: Option<DateTime<Utc>>,
}

impl PipelineRunStage {
    pub fn new(step_number: u8, name: &str, dag_name: &str) -> Self {
        Self {
            step_number,
            name: name.to_string(),
            dag_name: dag_name.to_string(),
            job_status: None,
            job_id: None,
            job_command: None,
            job_log_id: None,
            failed_jobs: None,
            executed_at: None,
        }
    }

    /// The four stages of the short-read mNGS pipeline, in order.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(1, "Host Filtering", "host_filter"),
            Self::new(2, "Alignment", "non_host_alignment"),
            Self::new(3, "Post Processing", "postprocess"),
            Self::new(4, "Experimental", "experimental"),
        ]
    }

    pub fn started(&self) -> bool {
        self.job_status.is_some()
    }

    pub fn succeeded(&self) -> bool {
        matches!(
            self.job_status,
            Some(StageStatus::Succeeded) | Some(StageStatus::Checked)
        )
    }

    pub fn failed(&self) -> bool {
        self.job_status == Some(StageStatus::Failed)
    }

    pub fn completed(&self) -> bool {
        self.succeeded() || self.failed()
    }

    /// Append the current job id to the retry log.
    pub fn record_failed_job(&mut self) {
        if let Some(job_id) = &self.job_id {
            match &mut self.failed_jobs {
                Some(log) => {
                    log.push(',');
                    log.push_str(job_id);
                }
                None => self.failed_jobs = Some(job_id.clone()),
            }
        }
    }

    /// Number of prior attempts recorded in the retry log.
    pub fn failed_attempts(&self) -> usize {
        self.failed_jobs
            .as_deref()
            .map(|log| log.split(',').filter(|s| !s.is_empty()).count())
            .unwrap_or(0)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.failed_attempts() >= MAX_STAGE_RETRIES
    }

    /// Clear job state so the stage can be resubmitted from scratch.
    pub fn reset(&mut self) {
        self.job_status = None;
        self.job_id = None;
        self.job_command = None;
        self.job_log_id = None;
        self.executed_at = None;
    }
}
