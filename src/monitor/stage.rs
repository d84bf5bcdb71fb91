//! Per-stage batch job lifecycle
//!
//! Each stage of a run maps to one batch job at a time. Completion is
//! detected cheaply through the marker files each job writes next to
//! its outputs; the scheduler itself is only described on a sampled
//! fraction of polls to stay under its API rate limits.

use crate::aws::{BatchClient, ObjectStore, SubmitOptions};
use crate::core::{MonitorConfig, PipelineRun, SamplePaths, StageStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stage whose memory demand routes it to the high-memory queue.
const HIMEM_STEP: u8 = 2;

pub struct StagePoller<S, B> {
    store: Arc<S>,
    batch: Arc<B>,
    config: MonitorConfig,
}

impl<S: ObjectStore, B: BatchClient> StagePoller<S, B> {
    pub fn new(store: Arc<S>, batch: Arc<B>, config: MonitorConfig) -> Self {
        Self {
            store,
            batch,
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

    fn submit_options(&self, step_number: u8) -> SubmitOptions {
        let queue = if step_number == HIMEM_STEP {
            self.config.batch_himem_queue.clone()
        } else {
            self.config.batch_queue.clone()
        };
        SubmitOptions {
            queue,
            memory_mb: self.config.batch_memory_mb,
            vcpus: self.config.batch_vcpus,
            docker_image: self.config.docker_image.clone(),
            job_role: self.config.job_role.clone(),
            storage_gb: self.config.batch_storage_gb,
        }
    }

    fn stage_command(&self, run: &PipelineRun, index: usize) -> String {
        let paths = self.paths_for(run);
        let stage = &run.stages[index];
        format!(
            "idseq_dag --workflow-name {} --output-dir-s3 {} --sample-id {}",
            stage.dag_name,
            paths.versioned_output_prefix(),
            run.sample_id
        )
    }

    /// Submit the stage's job to the batch scheduler and record the
    /// attempt on the stage.
    pub async fn run_stage_job(&self, run: &mut PipelineRun, index: usize) {
        let command = self.stage_command(run, index);
        let options = self.submit_options(run.stages[index].step_number);

        match self.batch.submit(&command, &options).await {
            Ok(job_id) => {
                info!(
                    sample_id = run.sample_id,
                    stage = %run.stages[index].name,
                    job_id = %job_id,
                    "Submitted stage job"
                );
                let stage = &mut run.stages[index];
                stage.job_id = Some(job_id);
                stage.job_command = Some(command);
                stage.job_status = Some(StageStatus::Started);
                stage.executed_at = Some(chrono::Utc::now());
            }
            Err(e) => {
                error!(
                    sample_id = run.sample_id,
                    stage = %run.stages[index].name,
                    "Stage job submission failed: {}", e
                );
                run.stages[index].job_status = Some(StageStatus::Failed);
            }
        }
    }

    /// Refresh the stage's status. Marker files win and terminate the
    /// batch job to reclaim its slot; otherwise the scheduler is
    /// described on roughly 1 out of `describe_sample_rate` polls.
    pub async fn update_stage_status(&self, run: &mut PipelineRun, index: usize) {
        let Some(job_id) = run.stages[index].job_id.clone() else {
            warn!(
                sample_id = run.sample_id,
                stage = %run.stages[index].name,
                "Stage marked started but has no job id"
            );
            run.stages[index].job_status = Some(StageStatus::Failed);
            return;
        };

        let paths = self.paths_for(run);
        if let Some(terminal) = self.check_markers(&paths, &job_id).await {
            run.stages[index].job_status = Some(terminal);
            // The job may still be draining; reclaim its slot.
            if let Err(e) = self.batch.terminate(&job_id, "marker file seen").await {
                debug!("Terminate of {} after marker: {}", job_id, e);
            }
            return;
        }

        if fastrand::u32(0..self.config.describe_sample_rate) != 0 {
            return;
        }

        match self.batch.describe(&job_id).await {
            Ok(description) => {
                if description.host_terminated() {
                    self.handle_host_termination(run, index).await;
                    return;
                }
                let stage = &mut run.stages[index];
                if let Some(log) = description.log_stream_name() {
                    stage.job_log_id = Some(log.to_string());
                }
                stage.job_status = Some(description.stage_status());
            }
            Err(e) => {
                // aegea raises an IndexError when the job id is unknown
                // to the scheduler; anything else is transient.
                if e.stderr().is_some_and(|s| s.contains("IndexError")) {
                    warn!("Job {} unknown to the scheduler: {}", job_id, e);
                    run.stages[index].job_status = Some(StageStatus::Failed);
                } else {
                    warn!("Describe of {} failed, will retry: {}", job_id, e);
                    run.stages[index].job_status = Some(StageStatus::Error);
                }
            }
        }
    }

    async fn check_markers(&self, paths: &SamplePaths, job_id: &str) -> Option<StageStatus> {
        match self.store.exists(&paths.stage_succeeded_marker(job_id)).await {
            Ok(true) => return Some(StageStatus::Succeeded),
            Ok(false) => {}
            Err(e) => {
                debug!("Succeeded marker check for {}: {}", job_id, e);
                return None;
            }
        }
        match self.store.exists(&paths.stage_failed_marker(job_id)).await {
            Ok(true) => Some(StageStatus::Failed),
            Ok(false) => None,
            Err(e) => {
                debug!("Failed marker check for {}: {}", job_id, e);
                None
            }
        }
    }

    /// An instance reclaim is not the pipeline's fault. Record the dead
    /// job and resubmit, up to the retry cap. Past the cap the stage
    /// keeps its current status and waits for manual intervention.
    async fn handle_host_termination(&self, run: &mut PipelineRun, index: usize) {
        run.stages[index].record_failed_job();
        if run.stages[index].retries_exhausted() {
            error!(
                sample_id = run.sample_id,
                stage = %run.stages[index].name,
                failed_jobs = ?run.stages[index].failed_jobs,
                "Host terminated and retries exhausted, needs manual intervention"
            );
            return;
        }
        info!(
            sample_id = run.sample_id,
            stage = %run.stages[index].name,
            attempt = run.stages[index].failed_attempts() + 1,
            "Host terminated, resubmitting stage job"
        );
        self.run_stage_job(run, index).await;
    }
}
