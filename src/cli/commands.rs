//! CLI command definitions

use clap::Args;

/// Run the monitor loop
#[derive(Debug, Args, Clone)]
pub struct MonitorCommand {
    /// Sweep in-progress runs once and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between sweeps, overriding the configured interval
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Don't persist runs to the database
    #[arg(long)]
    pub no_history: bool,
}

/// Show the status of a single run
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Pipeline run ID
    pub run_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show recent runs
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Sample ID to filter by
    #[arg(short, long)]
    pub sample: Option<i64>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Deprecate a workflow run and dispatch a replacement
#[derive(Debug, Args, Clone)]
pub struct RerunCommand {
    /// Workflow run ID
    pub workflow_run_id: String,
}
