//! Core domain models for pipeline status tracking
//!
//! This module defines the fundamental data structures that represent
//! pipeline runs, their stages, output states, and workflow runs.

pub mod config;
pub mod output;
pub mod paths;
pub mod run;
pub mod stage;
pub mod workflow;

pub use config::MonitorConfig;
pub use output::{LoadState, OutputKind, OutputState, REPORT_READY_OUTPUT};
pub use paths::SamplePaths;
pub use run::{InsertSizeMetrics, JobStat, PipelineRun, ResultsFinalized, Technology};
pub use stage::{PipelineRunStage, StageStatus, MAX_STAGE_RETRIES};
pub use workflow::{
    known_input_error, map_remote_status, WorkflowError, WorkflowKind, WorkflowRun,
    WorkflowRunStatus,
};
