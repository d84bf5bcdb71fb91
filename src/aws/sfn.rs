//! Step Functions execution status via the aws CLI

use crate::aws::{AwsError, CommandRunner, ObjectStore};
use crate::core::known_input_error;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfnExecutionDescription {
    pub status: String,
}

#[async_trait]
pub trait SfnClient: Send + Sync {
    async fn describe_execution(&self, arn: &str) -> Result<SfnExecutionDescription, AwsError>;
}

/// `SfnClient` shelling out to `aws stepfunctions`.
pub struct SfnCliClient {
    runner: CommandRunner,
    aws_path: String,
}

impl SfnCliClient {
    pub fn new(aws_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            runner: CommandRunner::new(timeout_secs),
            aws_path: aws_path.into(),
        }
    }
}

#[async_trait]
impl SfnClient for SfnCliClient {
    async fn describe_execution(&self, arn: &str) -> Result<SfnExecutionDescription, AwsError> {
        let stdout = self
            .runner
            .capture(
                &self.aws_path,
                &[
                    "stepfunctions",
                    "describe-execution",
                    "--execution-arn",
                    arn,
                    "--output",
                    "json",
                ],
            )
            .await?;
        serde_json::from_str(&stdout)
            .map_err(|e| AwsError::Parse(format!("describe-execution output: {}", e)))
    }
}

/// An error reported by the pipeline itself, written to the error file
/// next to the run's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputError {
    pub label: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl InputError {
    /// Whether the label is one the platform recognizes as caused by
    /// the user's input rather than the pipeline.
    pub fn is_known_user_error(&self) -> bool {
        known_input_error(&self.label).is_some()
    }
}

/// Fetch and parse the error file a failed execution leaves behind.
/// Absent or unparseable files yield `None` so callers fall back to a
/// generic failure.
pub async fn fetch_input_error<S: ObjectStore + ?Sized>(
    store: &S,
    error_file_path: &str,
) -> Option<InputError> {
    let body = match store.get(error_file_path).await {
        Ok(Some(body)) => body,
        Ok(None) => return None,
        Err(e) => {
            warn!("Could not fetch {}: {}", error_file_path, e);
            return None;
        }
    };
    match serde_yaml::from_str::<InputError>(&body) {
        Ok(error) => Some(error),
        Err(e) => {
            warn!("Could not parse {}: {}", error_file_path, e);
            None
        }
    }
}
