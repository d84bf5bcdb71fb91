//! Workflow run model
//!
//! A `WorkflowRun` tracks one execution of a single-workflow pipeline
//! (consensus genome, AMR) via a Step Functions execution ARN, as
//! opposed to the multi-stage batch pipeline tracked by `PipelineRun`.
//!
//! Reruns are idempotent: the current run is marked deprecated and a new
//! run is created with the same inputs, rather than resetting fields in
//! place. Deprecated runs are kept for before/after comparison; at most
//! one non-deprecated run per sample and workflow is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Workflows dispatched through the single-workflow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowKind {
    ConsensusGenome,
    Amr,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::ConsensusGenome => "consensus-genome",
            WorkflowKind::Amr => "amr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consensus-genome" => Some(WorkflowKind::ConsensusGenome),
            "amr" => Some(WorkflowKind::Amr),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowRunStatus {
    Created,
    Running,
    Succeeded,
    SucceededWithIssue,
    Failed,
}

impl WorkflowRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowRunStatus::Created => "CREATED",
            WorkflowRunStatus::Running => "RUNNING",
            WorkflowRunStatus::Succeeded => "SUCCEEDED",
            WorkflowRunStatus::SucceededWithIssue => "SUCCEEDED_WITH_ISSUE",
            WorkflowRunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(WorkflowRunStatus::Created),
            "RUNNING" => Some(WorkflowRunStatus::Running),
            "SUCCEEDED" => Some(WorkflowRunStatus::Succeeded),
            "SUCCEEDED_WITH_ISSUE" => Some(WorkflowRunStatus::SucceededWithIssue),
            "FAILED" => Some(WorkflowRunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(
            self,
            WorkflowRunStatus::Succeeded
                | WorkflowRunStatus::SucceededWithIssue
                | WorkflowRunStatus::Failed
        )
    }
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote execution statuses that all collapse into the local FAILED.
pub const FAILED_REMOTE_STATUSES: [&str; 3] = ["TIMED_OUT", "ABORTED", "FAILED"];

/// Map a remote Step Functions execution status onto the local status.
/// Unknown statuses return None and are ignored by callers.
pub fn map_remote_status(remote: &str) -> Option<WorkflowRunStatus> {
    if FAILED_REMOTE_STATUSES.contains(&remote) {
        return Some(WorkflowRunStatus::Failed);
    }
    WorkflowRunStatus::parse(remote)
}

/// Pipeline error labels caused by user input, with the message shown to
/// the user. Any other failure is treated as unexpected.
pub const INPUT_ERRORS: [(&str, &str); 4] = [
    (
        "InvalidInputFileError",
        "There was an error parsing one of the input files.",
    ),
    (
        "InsufficientReadsError",
        "The number of reads after filtering was insufficient for further analysis.",
    ),
    (
        "BrokenReadPairError",
        "There were too many discordant read pairs in the paired-end sample.",
    ),
    (
        "InvalidFileFormatError",
        "The input file you provided has a formatting error in it.",
    ),
];

/// Look up the user-facing message for a known input error label.
pub fn known_input_error(label: &str) -> Option<&'static str> {
    INPUT_ERRORS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, message)| *message)
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot rerun deprecated workflow runs")]
    RerunDeprecatedWorkflow,
}

/// One execution of a single-workflow pipeline for a sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub sample_id: i64,
    pub workflow: WorkflowKind,
    pub status: WorkflowRunStatus,
    pub deprecated: bool,

    /// Id of the run this one superseded, if it came from a rerun.
    pub rerun_from: Option<Uuid>,

    /// Workflow inputs that affect results, as JSON.
    pub inputs_json: Option<String>,

    /// Small outputs cached for quick batch display, as JSON.
    pub cached_results: Option<String>,

    pub sfn_execution_arn: Option<String>,
    pub s3_output_prefix: Option<String>,
    pub wdl_version: Option<String>,

    pub error_label: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(sample_id: i64, workflow: WorkflowKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample_id,
            workflow,
            status: WorkflowRunStatus::Created,
            deprecated: false,
            rerun_from: None,
            inputs_json: None,
            cached_results: None,
            sfn_execution_arn: None,
            s3_output_prefix: None,
            wdl_version: None,
            error_label: None,
            error_message: None,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    /// Version tag identifying the workflow release, e.g.
    /// `consensus-genome-v3.4`.
    pub fn workflow_version_tag(&self) -> String {
        format!(
            "{}-v{}",
            self.workflow,
            self.wdl_version.as_deref().unwrap_or("0")
        )
    }

    pub fn finalized(&self) -> bool {
        self.status.is_finalized()
    }

    /// Apply a new status. A finalized status is immutable to
    /// out-of-order updates; non-finalized transitions only persist when
    /// the status actually changed.
    ///
    /// Returns whether the status was applied.
    pub fn apply_status(&mut self, new_status: WorkflowRunStatus) -> bool {
        if self.finalized() || new_status == self.status {
            return false;
        }
        self.status = new_status;
        true
    }

    /// Mark this run deprecated and return the replacement run with the
    /// same workflow and inputs, ready to be dispatched.
    pub fn rerun(&mut self) -> Result<WorkflowRun, WorkflowError> {
        if self.deprecated {
            return Err(WorkflowError::RerunDeprecatedWorkflow);
        }
        self.deprecated = true;

        let mut replacement = WorkflowRun::new(self.sample_id, self.workflow);
        replacement.rerun_from = Some(self.id);
        replacement.inputs_json = self.inputs_json.clone();
        replacement.s3_output_prefix = self.s3_output_prefix.clone();
        Ok(replacement)
    }

    pub fn parsed_inputs(&self) -> Option<serde_json::Value> {
        self.inputs_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn get_input(&self, name: &str) -> Option<serde_json::Value> {
        self.parsed_inputs()?.get(name).cloned()
    }
}
