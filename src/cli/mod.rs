//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, MonitorCommand, RerunCommand, StatusCommand};
use std::ffi::OsString;

/// Pipeline and workflow run status monitor
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-monitor")]
#[command(version = "0.1.0")]
#[command(about = "Tracks sample pipeline runs to completion", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to monitor configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the monitor loop over in-progress runs
    Monitor(MonitorCommand),

    /// Show the status of a single run
    Status(StatusCommand),

    /// Show recent runs
    History(HistoryCommand),

    /// Deprecate a workflow run and dispatch a replacement
    Rerun(RerunCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
