//! Pipeline monitor: drives each in-progress run's stages to a
//! finalized job status.

use crate::aws::{fetch_input_error, ObjectStore, SfnClient};
use crate::core::workflow::FAILED_REMOTE_STATUSES;
use crate::core::{MonitorConfig, PipelineRun, SamplePaths};
use crate::monitor::stage::StagePoller;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the monitor decided about a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// The failure traced back to the user's input.
    KnownUserError,
    /// The run was reset and its failed stage resubmitted.
    AutoRestarted,
    /// The failure stands and was reported.
    Reported,
}

pub struct PipelineMonitor<S, B, F> {
    store: Arc<S>,
    sfn: Arc<F>,
    poller: StagePoller<S, B>,
    config: MonitorConfig,
}

impl<S, B, F> PipelineMonitor<S, B, F>
where
    S: ObjectStore,
    B: crate::aws::BatchClient,
    F: SfnClient,
{
    pub fn new(store: Arc<S>, batch: Arc<B>, sfn: Arc<F>, config: MonitorConfig) -> Self {
        let poller = StagePoller::new(Arc::clone(&store), Arc::clone(&batch), config.clone());
        Self {
            store,
            sfn,
            poller,
            config,
        }
    }

    fn paths_for(&self, run: &PipelineRun) -> SamplePaths {
        SamplePaths::new(
            &self.config.s3_bucket,
            run.sample_id,
            run.pipeline_version.as_deref(),
        )
    }

    /// One monitor tick for a multi-stage run. Starts, polls, or
    /// finalizes the active stage and rewrites the run's job status.
    ///
    /// `previous_runs` are the sample's earlier runs, consulted when
    /// deciding whether a failure may restart automatically.
    pub async fn update_job_status(
        &self,
        run: &mut PipelineRun,
        previous_runs: &[PipelineRun],
    ) -> Option<FailureAction> {
        if run.finalized() || run.deprecated {
            return None;
        }

        let Some(index) = run.active_stage_index() else {
            info!(sample_id = run.sample_id, "All stages succeeded");
            run.finalize_checked();
            return None;
        };

        if run.stages[index].failed() {
            return Some(self.handle_failed_stage(run, index, previous_runs).await);
        }

        if !run.stages[index].started() {
            self.poller.run_stage_job(run, index).await;
        } else {
            self.poller.update_stage_status(run, index).await;
        }

        if run.stages[index].failed() {
            // Reflect the failure immediately; the next tick finalizes.
            run.job_status = Some(run.format_stage_job_status(&run.stages[index]));
            run.touch();
            return None;
        }

        run.job_status = Some(run.format_stage_job_status(&run.stages[index]));
        run.touch();
        self.check_and_log_long_run(run);
        None
    }

    /// Like `update_job_status` but keeps advancing while stages
    /// complete, so a freshly succeeded stage's successor starts on the
    /// same tick.
    pub async fn async_update_job_status(
        &self,
        run: &mut PipelineRun,
        previous_runs: &[PipelineRun],
    ) -> Option<FailureAction> {
        let mut last_active = run.active_stage_index();
        loop {
            let action = self.update_job_status(run, previous_runs).await;
            let active = run.active_stage_index();
            if action.is_some() || run.finalized() || active == last_active {
                return action;
            }
            last_active = active;
        }
    }

    async fn handle_failed_stage(
        &self,
        run: &mut PipelineRun,
        index: usize,
        previous_runs: &[PipelineRun],
    ) -> FailureAction {
        run.finalize_failed();

        if let Some(error) = self.check_for_user_error(run).await {
            info!(
                sample_id = run.sample_id,
                label = %error.label,
                "Run failed on a known input problem"
            );
            run.error_message = error.message;
            run.known_user_error = Some(error.label);
            return FailureAction::KnownUserError;
        }

        if self.automatic_restart_allowed(run, index, previous_runs) {
            warn!(
                sample_id = run.sample_id,
                stage = %run.stages[index].name,
                "Automatically restarting failed run"
            );
            run.auto_restarted = true;
            run.retry();
            self.poller.run_stage_job(run, index).await;
            let status = run.format_stage_job_status(&run.stages[index]);
            run.job_status = Some(status);
            run.touch();
            return FailureAction::AutoRestarted;
        }

        error!(
            sample_id = run.sample_id,
            stage = %run.stages[index].name,
            failed_jobs = ?run.stages[index].failed_jobs,
            "SampleFailedEvent: run failed"
        );
        FailureAction::Reported
    }

    /// A failed first stage may have rejected the input itself; the
    /// pipeline reports that through a JSON file next to its outputs.
    async fn check_for_user_error(&self, run: &PipelineRun) -> Option<crate::aws::InputError> {
        // Stages beyond host filtering operate on validated input.
        if run.active_stage_index() != Some(0) {
            return None;
        }
        let paths = self.paths_for(run);
        let body = match self.store.get(&paths.invalid_step_input()).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                warn!("Input error check for sample {}: {}", run.sample_id, e);
                return None;
            }
        };
        Some(crate::aws::InputError {
            label: "FAULTY_INPUT".to_string(),
            message: Some(body.trim().to_string()),
        })
    }

    /// An automatic restart needs a mainline run, an allow-listed
    /// stage, and no earlier failure of the same pipeline version for
    /// this sample. The run's own restart counts as an earlier failure,
    /// so a deterministic failure stops after one resubmission.
    fn automatic_restart_allowed(
        &self,
        run: &PipelineRun,
        index: usize,
        previous_runs: &[PipelineRun],
    ) -> bool {
        if run.auto_restarted {
            return false;
        }
        if !matches!(run.pipeline_branch.as_deref(), None | Some("master")) {
            return false;
        }
        let step = run.stages[index].step_number;
        if !self.config.auto_restart_stages.contains(&step) {
            return false;
        }
        !previous_runs.iter().any(|prev| {
            prev.id != run.id && prev.failed() && prev.pipeline_version == run.pipeline_version
        })
    }

    /// Log one alert for a run that has been going unreasonably long.
    fn check_and_log_long_run(&self, run: &mut PipelineRun) {
        if run.finalized() || run.alert_sent {
            return;
        }
        if run.duration_hrs() >= self.config.long_run_alert_hours {
            error!(
                sample_id = run.sample_id,
                duration_hrs = run.duration_hrs(),
                "LongRunningSampleEvent: run exceeded alert threshold"
            );
            run.alert_sent = true;
            run.touch();
        }
    }

    /// One monitor tick for a run executed as a single Step Functions
    /// execution (the long-read pipeline). Terminal remote statuses
    /// finalize the run; everything else leaves it running.
    pub async fn update_single_stage_run_status(&self, run: &mut PipelineRun) {
        if run.finalized() || run.deprecated {
            return;
        }
        let Some(arn) = run.sfn_execution_arn.clone() else {
            warn!(sample_id = run.sample_id, "Run has no execution arn");
            return;
        };

        let description = match self.sfn.describe_execution(&arn).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Describe of {} failed, will retry: {}", arn, e);
                return;
            }
        };

        if FAILED_REMOTE_STATUSES.contains(&description.status.as_str()) {
            let paths = self.paths_for(run);
            if let Some(error) = fetch_input_error(&*self.store, &paths.sfn_error_file()).await {
                if error.is_known_user_error() {
                    run.known_user_error = Some(error.label.clone());
                }
                run.error_message = error.message.clone();
            } else {
                error!(
                    sample_id = run.sample_id,
                    status = %description.status,
                    "SampleFailedEvent: execution failed"
                );
            }
            run.finalize_failed();
        } else if description.status == "SUCCEEDED" {
            run.finalize_checked();
        } else {
            run.job_status = Some(crate::core::run::STATUS_RUNNING.to_string());
            run.touch();
        }
        self.check_and_log_long_run(run);
    }
}
