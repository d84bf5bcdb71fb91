//! Boundaries to AWS tooling
//!
//! All calls shell out to the aws / aegea CLIs and parse their stdout.
//! Each boundary is a trait so the monitors can be driven by mock
//! implementations in tests.

pub mod batch;
pub mod command;
pub mod s3;
pub mod sfn;

use thiserror::Error;

pub use batch::{AegeaBatchClient, BatchClient, BatchJobDescription, SubmitOptions};
pub use command::CommandRunner;
pub use s3::{get_with_retries, ObjectStore, S3CliStore};
pub use sfn::{fetch_input_error, InputError, SfnCliClient, SfnClient, SfnExecutionDescription};

/// Error types for AWS boundary operations
#[derive(Debug, Error)]
pub enum AwsError {
    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Failed to parse command output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AwsError {
    /// Stderr of a failed command, if this is a command failure.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            AwsError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
