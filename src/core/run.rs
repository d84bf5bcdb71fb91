//! Pipeline run model
//!
//! A `PipelineRun` represents one execution of the mNGS pipeline for a
//! sample. It owns the ordered run stages tracked by the pipeline
//! monitor and the output states tracked by the result monitor.
//!
//! The run's `job_status` string records the most recent stage the run
//! was at together with that stage's status (e.g.
//! `"3.Post Processing-RUNNING"`). At the end of a successful run it is
//! set to `CHECKED`. If a late stage failed but the main report is
//! nevertheless ready, the suffix `|READY` is appended. `finalized`
//! means the pipeline monitor no longer needs to attend to the run;
//! `results_finalized` means the same for the result monitor. Both are
//! monotonic: a run never un-finalizes.

use crate::core::output::{LoadState, OutputKind, OutputState, REPORT_READY_OUTPUT};
use crate::core::stage::{PipelineRunStage, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATUS_CHECKED: &str = "CHECKED";
pub const STATUS_FAILED: &str = "FAILED";
pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_READY: &str = "READY";

/// Sequencing technology of the sample, which determines the target
/// outputs the result monitor waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technology {
    Illumina,
    Nanopore,
}

impl Technology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technology::Illumina => "Illumina",
            Technology::Nanopore => "ONT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Illumina" => Some(Technology::Illumina),
            "ONT" => Some(Technology::Nanopore),
            _ => None,
        }
    }

    /// Outputs the pipeline produces for this technology.
    pub fn target_outputs(&self) -> Vec<OutputKind> {
        match self {
            Technology::Illumina => vec![
                OutputKind::ErccCounts,
                OutputKind::TaxonCounts,
                OutputKind::ContigCounts,
                OutputKind::TaxonByteranges,
                OutputKind::InsertSizeMetrics,
                OutputKind::AccessionCoverageStats,
            ],
            Technology::Nanopore => vec![
                OutputKind::TaxonCounts,
                OutputKind::ContigCounts,
                OutputKind::TaxonByteranges,
                OutputKind::AccessionCoverageStats,
            ],
        }
    }
}

/// Result monitor finalization state. Stored as an integer so that
/// legacy rows (no value) remain distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultsFinalized {
    InProgress,
    FinalizedSuccess,
    FinalizedFail,
}

impl ResultsFinalized {
    pub fn as_i64(&self) -> i64 {
        match self {
            ResultsFinalized::InProgress => 0,
            ResultsFinalized::FinalizedSuccess => 10,
            ResultsFinalized::FinalizedFail => 20,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(ResultsFinalized::InProgress),
            10 => Some(ResultsFinalized::FinalizedSuccess),
            20 => Some(ResultsFinalized::FinalizedFail),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultsFinalized::InProgress)
    }
}

/// Per-task read/base count compiled from the pipeline's `stats.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStat {
    pub task: String,
    pub reads_after: Option<i64>,
    pub bases_after: Option<i64>,
}

/// Insert size metrics parsed from the picard output of host filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertSizeMetrics {
    pub median: Option<i64>,
    pub mode: Option<i64>,
    pub median_absolute_deviation: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: Option<f64>,
    pub standard_deviation: Option<f64>,
    pub read_pairs: Option<i64>,
}

/// One execution of the multi-stage mNGS pipeline for a sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub sample_id: i64,
    pub technology: Technology,

    /// Resolved from `pipeline_version.txt` in S3 once available;
    /// determines the S3 locations of output files.
    pub pipeline_version: Option<String>,
    pub pipeline_branch: Option<String>,

    pub job_status: Option<String>,
    pub finalized: bool,
    pub results_finalized: Option<ResultsFinalized>,

    pub known_user_error: Option<String>,
    pub error_message: Option<String>,

    pub deprecated: bool,
    pub alert_sent: bool,

    /// Set when the monitor restarts this run after a failure, so the
    /// same run never restarts twice.
    #[serde(default)]
    pub auto_restarted: bool,

    pub sfn_execution_arn: Option<String>,
    pub s3_output_prefix: Option<String>,

    pub stages: Vec<PipelineRunStage>,
    pub output_states: Vec<OutputState>,

    pub total_ercc_reads: Option<i64>,
    pub insert_size_metrics: Option<InsertSizeMetrics>,

    #[serde(default)]
    pub job_stats: Vec<JobStat>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,

    /// Seconds from executed_at to finalization, for reporting.
    pub time_to_finalized: Option<f64>,
    pub time_to_results_finalized: Option<f64>,
}

impl PipelineRun {
    pub fn new(sample_id: i64, technology: Technology) -> Self {
        let now = Utc::now();
        // Stages only apply to the multi-stage Illumina pipeline; the
        // long-read pipeline is tracked directly from its execution.
        let stages = match technology {
            Technology::Illumina => PipelineRunStage::defaults(),
            Technology::Nanopore => Vec::new(),
        };
        let output_states = technology
            .target_outputs()
            .into_iter()
            .map(OutputState::new)
            .collect();

        Self {
            id: Uuid::new_v4(),
            sample_id,
            technology,
            pipeline_version: None,
            pipeline_branch: None,
            job_status: None,
            finalized: false,
            results_finalized: Some(ResultsFinalized::InProgress),
            known_user_error: None,
            error_message: None,
            deprecated: false,
            alert_sent: false,
            auto_restarted: false,
            sfn_execution_arn: None,
            s3_output_prefix: None,
            stages,
            output_states,
            total_ercc_reads: None,
            insert_size_metrics: None,
            job_stats: Vec::new(),
            created_at: now,
            updated_at: now,
            executed_at: Some(now),
            time_to_finalized: None,
            time_to_results_finalized: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn results_finalized(&self) -> bool {
        self.results_finalized
            .map(|r| r.is_terminal())
            .unwrap_or(false)
    }

    pub fn succeeded(&self) -> bool {
        self.job_status.as_deref() == Some(STATUS_CHECKED)
    }

    pub fn failed(&self) -> bool {
        self.job_status
            .as_deref()
            .map(|s| s.contains(STATUS_FAILED))
            .unwrap_or(false)
            || self.results_finalized == Some(ResultsFinalized::FinalizedFail)
    }

    /// Whether a report is ready to be cached: all DB-destined results
    /// loaded successfully AND all batch jobs completed successfully.
    /// The second condition matters because some outputs are fetched
    /// from S3 at view time and are only known complete once the last
    /// job has succeeded.
    pub fn ready_for_cache(&self) -> bool {
        self.results_finalized == Some(ResultsFinalized::FinalizedSuccess) && self.succeeded()
    }

    /// The main report is ready once the taxon counts output has loaded.
    pub fn report_ready(&self) -> bool {
        self.output_states
            .iter()
            .any(|os| os.output == REPORT_READY_OUTPUT && os.state == LoadState::Loaded)
    }

    /// Index of the first stage that has not succeeded, or None if all
    /// stages succeeded.
    pub fn active_stage_index(&self) -> Option<usize> {
        let mut ordered: Vec<usize> = (0..self.stages.len()).collect();
        ordered.sort_by_key(|&i| self.stages[i].step_number);
        ordered.into_iter().find(|&i| !self.stages[i].succeeded())
    }

    pub fn active_stage(&self) -> Option<&PipelineRunStage> {
        self.active_stage_index().map(|i| &self.stages[i])
    }

    pub fn output_state(&self, output: OutputKind) -> Option<&OutputState> {
        self.output_states.iter().find(|os| os.output == output)
    }

    pub fn output_state_mut(&mut self, output: OutputKind) -> Option<&mut OutputState> {
        self.output_states.iter_mut().find(|os| os.output == output)
    }

    pub fn all_output_states_terminal(&self) -> bool {
        self.output_states.iter().all(|os| os.state.is_terminal())
    }

    pub fn all_output_states_loaded(&self) -> bool {
        self.output_states
            .iter()
            .all(|os| os.state == LoadState::Loaded)
    }

    /// Mark the pipeline monitor done with this run, successfully.
    /// No-op if the run is already finalized.
    pub fn finalize_checked(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.job_status = Some(STATUS_CHECKED.to_string());
        self.time_to_finalized = self.time_since_executed_at();
        self.touch();
    }

    /// Mark the pipeline monitor done with this run, as a failure.
    /// No-op if the run is already finalized.
    pub fn finalize_failed(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.job_status = Some(STATUS_FAILED.to_string());
        self.time_to_finalized = self.time_since_executed_at();
        self.touch();
    }

    /// Mark the result monitor done with this run. Terminal values are
    /// sticky: once success or failure is recorded it cannot change.
    pub fn finalize_results(&mut self, success: bool) {
        if self.results_finalized() {
            return;
        }
        self.results_finalized = Some(if success {
            ResultsFinalized::FinalizedSuccess
        } else {
            ResultsFinalized::FinalizedFail
        });
        self.time_to_results_finalized = self.time_since_executed_at();
        self.touch();
    }

    /// Reset a failed run so the monitors pick it up again. Only the
    /// active (failed) stage is cleared; loaded outputs are kept.
    pub fn retry(&mut self) {
        if !self.failed() {
            return;
        }
        if let Some(i) = self.active_stage_index() {
            self.stages[i].reset();
        }
        self.finalized = false;
        self.results_finalized = Some(ResultsFinalized::InProgress);
        self.time_to_finalized = None;
        self.time_to_results_finalized = None;
        for os in &mut self.output_states {
            if os.state != LoadState::Loaded {
                os.state = LoadState::Unknown;
            }
        }
        self.touch();
    }

    pub fn run_time(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn duration_hrs(&self) -> f64 {
        (self.run_time().num_seconds() as f64 / 3600.0 * 100.0).round() / 100.0
    }

    pub fn time_since_executed_at(&self) -> Option<f64> {
        self.executed_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
    }

    /// Derive the display job status from a stage, e.g.
    /// `"3.Post Processing-RUNNING"` or `"1.Host Filtering-FAILED|READY"`.
    pub fn format_stage_job_status(&self, stage: &PipelineRunStage) -> String {
        let status = stage.job_status.unwrap_or(StageStatus::Started);
        let mut text = format!("{}.{}-{}", stage.step_number, stage.name, status);
        if self.report_ready() {
            text.push('|');
            text.push_str(STATUS_READY);
        }
        text
    }

    /// Short status for display, e.g. "Running Host Filtering".
    pub fn job_status_display(&self) -> String {
        match &self.job_status {
            None => "Pipeline Initializing".to_string(),
            Some(status) => {
                let stage = status
                    .split('-')
                    .next()
                    .and_then(|prefix| prefix.split('.').nth(1));
                match stage {
                    Some(name) => format!("Running {}", name),
                    None => status.clone(),
                }
            }
        }
    }
}
