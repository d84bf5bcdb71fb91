//! Subprocess runner shared by the CLI-backed AWS clients

use crate::aws::AwsError;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs external commands with a timeout and captured output.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl CommandRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    /// Run a command and return its raw output, regardless of exit code.
    ///
    /// # Errors
    /// Returns `AwsError` if the executable cannot be spawned or the
    /// command times out. A non-zero exit is not an error here; callers
    /// that treat it as "object absent" inspect the status themselves.
    pub async fn output(&self, program: &str, args: &[&str]) -> Result<Output, AwsError> {
        debug!("Spawning {} with {} args", program, args.len());

        let timeout_duration = Duration::from_secs(self.timeout_secs);
        let result = timeout(
            timeout_duration,
            Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AwsError::Timeout(self.timeout_secs))?;

        Ok(result?)
    }

    /// Run a command and return its stdout as UTF-8, erroring on a
    /// non-zero exit.
    pub async fn capture(&self, program: &str, args: &[&str]) -> Result<String, AwsError> {
        let output = self.output(program, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            return Err(AwsError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                code,
                stderr,
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| AwsError::Parse(format!("output was not valid UTF-8: {}", e)))
    }
}
