//! The three monitors that drive runs to completion
//!
//! The pipeline monitor watches stage jobs, the result monitor watches
//! output files, and the workflow monitor watches single-workflow
//! executions. Each operates on one run per call; the outer loop in
//! the binary sweeps the in-progress runs on an interval.

pub mod pipeline;
pub mod result;
pub mod stage;
pub mod workflow;

pub use pipeline::{FailureAction, PipelineMonitor};
pub use result::{
    run_loader, ChannelLoaderQueue, LoadError, LoadRequest, LoadedResult, LoaderQueue,
    LogResultsObserver, ResultLoader, ResultMonitor, ResultsObserver, S3ResultLoader,
};
pub use stage::StagePoller;
pub use workflow::{
    fail_created_runs_for_samples, reset_latest_failed_run, CachedResultsLoader,
    S3CachedResultsLoader, WorkflowMonitor,
};
