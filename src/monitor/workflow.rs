//! Workflow monitor: status tracking for single-workflow runs
//! (consensus genome, AMR).

use crate::aws::{fetch_input_error, InputError, ObjectStore, SfnClient};
use crate::core::paths::SFN_ERROR_FILE;
use crate::core::{known_input_error, map_remote_status, WorkflowRun, WorkflowRunStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Loads the small result summary that gets denormalized onto the run
/// for cheap batch display.
#[async_trait]
pub trait CachedResultsLoader: Send + Sync {
    async fn load(&self, run: &WorkflowRun) -> anyhow::Result<Option<String>>;
}

/// Fetches the workflow's result summary JSON from its output prefix.
pub struct S3CachedResultsLoader<S> {
    store: Arc<S>,
}

impl<S: ObjectStore> S3CachedResultsLoader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ObjectStore> CachedResultsLoader for S3CachedResultsLoader<S> {
    async fn load(&self, run: &WorkflowRun) -> anyhow::Result<Option<String>> {
        let Some(prefix) = run.s3_output_prefix.as_deref() else {
            return Ok(None);
        };
        let path = format!("{}/cached_results.json", prefix.trim_end_matches('/'));
        let body = self.store.get(&path).await?;
        Ok(body)
    }
}

pub struct WorkflowMonitor<S, F> {
    store: Arc<S>,
    sfn: Arc<F>,
    results_loader: Arc<dyn CachedResultsLoader>,
}

impl<S: ObjectStore, F: SfnClient> WorkflowMonitor<S, F> {
    pub fn new(store: Arc<S>, sfn: Arc<F>, results_loader: Arc<dyn CachedResultsLoader>) -> Self {
        Self {
            store,
            sfn,
            results_loader,
        }
    }

    /// Apply a remote execution status to the run. When `pushed_status`
    /// is None the execution is described directly; a pushed status
    /// (from a notification) skips the describe call.
    pub async fn update_status(&self, run: &mut WorkflowRun, pushed_status: Option<&str>) {
        if run.finalized() || run.deprecated {
            return;
        }

        let remote = match pushed_status {
            Some(status) => status.to_string(),
            None => {
                let Some(arn) = run.sfn_execution_arn.clone() else {
                    warn!(workflow_run = %run.id, "Run has no execution arn");
                    return;
                };
                match self.sfn.describe_execution(&arn).await {
                    Ok(d) => d.status,
                    Err(e) => {
                        warn!("Describe of {} failed, will retry: {}", arn, e);
                        return;
                    }
                }
            }
        };

        let Some(status) = map_remote_status(&remote) else {
            warn!(workflow_run = %run.id, remote = %remote, "Unrecognized execution status");
            return;
        };

        match status {
            WorkflowRunStatus::Failed => {
                if let Some(input_error) = self.input_error(run).await {
                    info!(
                        workflow_run = %run.id,
                        label = %input_error.label,
                        "Workflow failed on a known input problem"
                    );
                    // The user-facing message comes from the fixed
                    // label table, not from the raw error blob.
                    run.error_message = known_input_error(&input_error.label).map(String::from);
                    run.error_label = Some(input_error.label);
                    run.apply_status(WorkflowRunStatus::SucceededWithIssue);
                } else {
                    error!(
                        workflow_run = %run.id,
                        sample_id = run.sample_id,
                        workflow = %run.workflow,
                        "SampleFailedEvent: workflow run failed"
                    );
                    run.apply_status(WorkflowRunStatus::Failed);
                }
            }
            WorkflowRunStatus::Succeeded => {
                self.load_cached_results(run).await;
                run.apply_status(WorkflowRunStatus::Succeeded);
            }
            other => {
                run.apply_status(other);
            }
        }
    }

    /// An error the workflow itself reported, with a label the platform
    /// recognizes as the user's input being at fault.
    async fn input_error(&self, run: &WorkflowRun) -> Option<InputError> {
        let prefix = run.s3_output_prefix.as_deref()?;
        let path = format!("{}/{}", prefix.trim_end_matches('/'), SFN_ERROR_FILE);
        let error = fetch_input_error(&*self.store, &path).await?;
        error.is_known_user_error().then_some(error)
    }

    /// Failures here never block the status transition; the results can
    /// be recovered later from S3.
    async fn load_cached_results(&self, run: &mut WorkflowRun) {
        match self.results_loader.load(run).await {
            Ok(Some(results)) => run.cached_results = Some(results),
            Ok(None) => {}
            Err(e) => warn!(workflow_run = %run.id, "Loading cached results failed: {}", e),
        }
    }
}

/// Fail any still-CREATED runs belonging to the given samples. Used
/// when an upload is abandoned so its runs do not poll forever.
pub fn fail_created_runs_for_samples(runs: &mut [WorkflowRun], sample_ids: &[i64]) -> usize {
    let mut failed = 0;
    for run in runs.iter_mut() {
        if run.status == WorkflowRunStatus::Created && sample_ids.contains(&run.sample_id) {
            if run.apply_status(WorkflowRunStatus::Failed) {
                failed += 1;
            }
        }
    }
    failed
}

/// Reset the sample's newest non-deprecated FAILED run to CREATED so it
/// can be dispatched again. Used when an abandoned upload restarts.
pub fn reset_latest_failed_run(runs: &mut [WorkflowRun], sample_id: i64) -> Option<Uuid> {
    let run = runs
        .iter_mut()
        .filter(|run| {
            run.sample_id == sample_id && run.status == WorkflowRunStatus::Failed && !run.deprecated
        })
        .max_by_key(|run| run.created_at)?;
    run.status = WorkflowRunStatus::Created;
    Some(run.id)
}
