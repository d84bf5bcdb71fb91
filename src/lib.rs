//! pipeline-monitor - status tracking for sample pipeline runs
//!
//! Drives metagenomics pipeline runs through their stages on AWS Batch,
//! watches S3 for their output files, and tracks single-workflow runs
//! executed on Step Functions.

pub mod aws;
pub mod cli;
pub mod core;
pub mod monitor;
pub mod persistence;

// Re-export commonly used types
pub use aws::{AegeaBatchClient, AwsError, BatchClient, ObjectStore, S3CliStore, SfnClient};
pub use core::{
    MonitorConfig, OutputKind, PipelineRun, PipelineRunStage, SamplePaths, StageStatus,
    Technology, WorkflowRun, WorkflowRunStatus,
};
pub use monitor::{PipelineMonitor, ResultMonitor, WorkflowMonitor};
pub use persistence::{InMemoryRunStore, RunStore};
