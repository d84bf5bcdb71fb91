//! Result monitor: watches S3 for a run's output files, hands them to
//! loaders, and finalizes the run's results once every output settles.

use crate::aws::{get_with_retries, AwsError, ObjectStore};
use crate::core::paths::parse_pipeline_version;
use crate::core::{
    InsertSizeMetrics, JobStat, LoadState, MonitorConfig, OutputKind, PipelineRun, SamplePaths,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Output file missing: {0}")]
    Missing(String),

    #[error("Could not parse output: {0}")]
    Parse(String),

    #[error(transparent)]
    Aws(#[from] AwsError),
}

/// A single output of a single run, queued for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub run_id: Uuid,
    pub output: OutputKind,
}

/// Where the result monitor sends outputs it found in S3.
pub trait LoaderQueue: Send + Sync {
    fn enqueue(&self, request: LoadRequest);
}

/// `LoaderQueue` backed by an in-process channel; the receiver side is
/// drained by the loader task.
pub struct ChannelLoaderQueue {
    tx: mpsc::UnboundedSender<LoadRequest>,
}

impl ChannelLoaderQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoadRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LoaderQueue for ChannelLoaderQueue {
    fn enqueue(&self, request: LoadRequest) {
        // Send only fails when the loader task is gone, at shutdown.
        if self.tx.send(request.clone()).is_err() {
            warn!("Loader queue closed, dropping {:?}", request);
        }
    }
}

/// The parsed content of one output file.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedResult {
    ErccCounts(i64),
    InsertSizeMetrics(InsertSizeMetrics),
    Rows(usize),
}

/// Fetches and parses one output of a run.
#[async_trait]
pub trait ResultLoader: Send + Sync {
    async fn load(&self, run: &PipelineRun, output: OutputKind)
        -> Result<LoadedResult, LoadError>;
}

/// Called once per run when its results finalize.
pub trait ResultsObserver: Send + Sync {
    fn results_finalized(&self, run: &PipelineRun);
}

/// Default observer: results finalization is only logged.
pub struct LogResultsObserver;

impl ResultsObserver for LogResultsObserver {
    fn results_finalized(&self, run: &PipelineRun) {
        info!(
            sample_id = run.sample_id,
            success = run.all_output_states_loaded(),
            "Results finalized"
        );
    }
}

pub struct ResultMonitor<S> {
    store: Arc<S>,
    queue: Arc<dyn LoaderQueue>,
    observer: Arc<dyn ResultsObserver>,
    config: MonitorConfig,
}

impl<S: ObjectStore> ResultMonitor<S> {
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn LoaderQueue>,
        observer: Arc<dyn ResultsObserver>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            observer,
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

    /// One result-monitor tick: resolve the pipeline version, enqueue
    /// any outputs that appeared, and finalize once all are terminal.
    pub async fn monitor_results(&self, run: &mut PipelineRun) {
        if run.deprecated || run.results_finalized() {
            return;
        }

        if run.pipeline_version.is_none() {
            self.resolve_pipeline_version(run).await;
            // Without a version the output locations are unknowable, so
            // wait. A finalized run will never produce one, though, and
            // has to proceed so its missing outputs can fail.
            if run.pipeline_version.is_none() && !run.finalized() {
                return;
            }
        }

        let stats_error = self.compile_stats(run).await;

        for output in run.technology.target_outputs() {
            let state = run.output_state(output).map(|os| os.state);
            if matches!(state, Some(LoadState::Unknown | LoadState::LoadingError)) {
                self.check_and_enqueue(run, output).await;
            }
        }

        if run.all_output_states_terminal() {
            let success = run.all_output_states_loaded() && stats_error.is_none();
            run.finalize_results(success);
            self.observer.results_finalized(run);
            if run.ready_for_cache() {
                info!(sample_id = run.sample_id, "Report ready for precaching");
            }
        }
    }

    /// The version file is written by the first stage. Only trust it
    /// once it is newer than the run, so a rerun does not pick up the
    /// previous run's version.
    async fn resolve_pipeline_version(&self, run: &mut PipelineRun) {
        let paths = SamplePaths::new(&self.config.s3_bucket, run.sample_id, None);
        let version_file = paths.pipeline_version_file();

        let modified = match self.store.modified_at(&version_file).await {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(e) => {
                warn!("Version file check for sample {}: {}", run.sample_id, e);
                return;
            }
        };
        if modified <= run.created_at {
            return;
        }

        // The listing and the read can race the writer; retry briefly.
        let body = match get_with_retries(&*self.store, &version_file, 3, 1).await {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                warn!("Version file fetch for sample {}: {}", run.sample_id, e);
                return;
            }
        };
        match parse_pipeline_version(&body) {
            Some(version) => {
                info!(sample_id = run.sample_id, version = %version, "Resolved pipeline version");
                run.pipeline_version = Some(version);
                run.touch();
            }
            None => warn!(
                "Unparseable version file for sample {}: {:?}",
                run.sample_id,
                body.trim()
            ),
        }
    }

    /// Refresh the per-task read counts from the pipeline's stats file.
    /// Absence is not an error (the file only appears once host
    /// filtering finishes), but a file that cannot be read or parsed
    /// blocks a successful results finalization.
    async fn compile_stats(&self, run: &mut PipelineRun) -> Option<LoadError> {
        let path = self.paths_for(run).stats_json();
        let body = match self.store.get(&path).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                warn!("Stats fetch for sample {}: {}", run.sample_id, e);
                return Some(e.into());
            }
        };
        match parse_job_stats(&body) {
            Ok(stats) => {
                run.job_stats = stats;
                run.touch();
                None
            }
            Err(e) => {
                error!(
                    sample_id = run.sample_id,
                    "SampleFailedEvent: compiling stats failed: {}", e
                );
                Some(e)
            }
        }
    }

    async fn check_and_enqueue(&self, run: &mut PipelineRun, output: OutputKind) {
        let paths = self.paths_for(run);
        let path = paths.s3_file_for(output);

        match self.store.exists(&path).await {
            Ok(true) => {
                self.mark_queued(run, output);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Existence check for {}: {}", path, e);
                return;
            }
        }

        // Give a finalized run's last outputs a grace period to land
        // before declaring them missing.
        if !run.finalized() || !self.settle_elapsed(run) {
            return;
        }

        if output == OutputKind::InsertSizeMetrics {
            // Metrics moved under the versioned prefix; when absent in
            // both places they were simply not produced for this sample.
            match self.store.exists(&paths.versioned_insert_size_metrics()).await {
                Ok(true) => self.mark_queued(run, output),
                Ok(false) => self.mark(run, output, LoadState::Loaded),
                Err(e) => warn!("Existence check for insert size metrics: {}", e),
            }
            return;
        }

        warn!(
            sample_id = run.sample_id,
            output = %output,
            "Output never appeared after finalization"
        );
        self.mark(run, output, LoadState::Failed);
    }

    fn settle_elapsed(&self, run: &PipelineRun) -> bool {
        (Utc::now() - run.updated_at).num_seconds() >= self.config.finalized_settle_secs
    }

    fn mark_queued(&self, run: &mut PipelineRun, output: OutputKind) {
        self.mark(run, output, LoadState::LoadingQueued);
        self.queue.enqueue(LoadRequest {
            run_id: run.id,
            output,
        });
    }

    fn mark(&self, run: &mut PipelineRun, output: OutputKind, state: LoadState) {
        if let Some(os) = run.output_state_mut(output) {
            os.state = state;
            run.touch();
        }
    }
}

/// Drain one queued request against the run it belongs to: mark it
/// loading, invoke the loader, and record the outcome on the run.
pub async fn run_loader<L: ResultLoader + ?Sized>(
    loader: &L,
    run: &mut PipelineRun,
    output: OutputKind,
) {
    if let Some(os) = run.output_state_mut(output) {
        os.state = LoadState::Loading;
    }

    match loader.load(run, output).await {
        Ok(result) => {
            let rows = match result {
                LoadedResult::ErccCounts(total) => {
                    run.total_ercc_reads = Some(total);
                    None
                }
                LoadedResult::InsertSizeMetrics(metrics) => {
                    run.insert_size_metrics = Some(metrics);
                    None
                }
                LoadedResult::Rows(n) => Some(n),
            };
            if let Some(os) = run.output_state_mut(output) {
                os.state = LoadState::Loaded;
                os.rows_loaded = rows;
            }
        }
        Err(e) => {
            warn!(
                sample_id = run.sample_id,
                output = %output,
                "Loading failed: {}", e
            );
            if let Some(os) = run.output_state_mut(output) {
                os.state = LoadState::LoadingError;
            }
        }
    }
    run.touch();
}

/// `ResultLoader` that fetches output files from S3 and parses them.
pub struct S3ResultLoader<S> {
    store: Arc<S>,
    bucket: String,
}

impl<S: ObjectStore> S3ResultLoader<S> {
    pub fn new(store: Arc<S>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    async fn fetch(&self, path: &str) -> Result<String, LoadError> {
        self.store
            .get(path)
            .await?
            .ok_or_else(|| LoadError::Missing(path.to_string()))
    }
}

#[async_trait]
impl<S: ObjectStore> ResultLoader for S3ResultLoader<S> {
    async fn load(
        &self,
        run: &PipelineRun,
        output: OutputKind,
    ) -> Result<LoadedResult, LoadError> {
        let paths = SamplePaths::new(&self.bucket, run.sample_id, run.pipeline_version.as_deref());

        match output {
            OutputKind::ErccCounts => {
                let body = self.fetch(&paths.s3_file_for(output)).await?;
                Ok(LoadedResult::ErccCounts(parse_ercc_counts(&body)))
            }
            OutputKind::InsertSizeMetrics => {
                let body = match self.fetch(&paths.s3_file_for(output)).await {
                    Ok(body) => body,
                    Err(LoadError::Missing(_)) => {
                        self.fetch(&paths.versioned_insert_size_metrics()).await?
                    }
                    Err(e) => return Err(e),
                };
                Ok(LoadedResult::InsertSizeMetrics(parse_insert_size_metrics(
                    &body,
                )?))
            }
            _ => {
                let body = self.fetch(&paths.s3_file_for(output)).await?;
                let value: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| LoadError::Parse(format!("{}: {}", output, e)))?;
                Ok(LoadedResult::Rows(count_rows(&value)))
            }
        }
    }
}

/// Total ERCC spike-in reads from a per-gene counts TSV. Lines are
/// `gene_name<TAB>count`; only ERCC genes are summed.
pub fn parse_ercc_counts(body: &str) -> i64 {
    body.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?;
            if !name.starts_with("ERCC") {
                return None;
            }
            fields.next()?.trim().parse::<i64>().ok()
        })
        .sum()
}

/// Parse picard's CollectInsertSizeMetrics text output: a
/// `## METRICS CLASS` marker followed by a header row and one value row.
pub fn parse_insert_size_metrics(body: &str) -> Result<InsertSizeMetrics, LoadError> {
    let mut lines = body.lines();
    for line in lines.by_ref() {
        if line.starts_with("## METRICS CLASS") {
            break;
        }
    }
    let header = lines
        .next()
        .ok_or_else(|| LoadError::Parse("metrics header row missing".to_string()))?;
    let values = lines
        .next()
        .ok_or_else(|| LoadError::Parse("metrics value row missing".to_string()))?;

    let columns: Vec<&str> = header.split('\t').collect();
    let fields: Vec<&str> = values.split('\t').collect();
    let get = |name: &str| -> Option<&str> {
        let i = columns.iter().position(|c| *c == name)?;
        fields.get(i).copied().filter(|v| !v.is_empty())
    };
    let int = |name: &str| get(name).and_then(|v| v.parse::<i64>().ok());
    let float = |name: &str| get(name).and_then(|v| v.parse::<f64>().ok());

    Ok(InsertSizeMetrics {
        median: int("MEDIAN_INSERT_SIZE"),
        mode: int("MODE_INSERT_SIZE"),
        median_absolute_deviation: int("MEDIAN_ABSOLUTE_DEVIATION"),
        min: int("MIN_INSERT_SIZE"),
        max: int("MAX_INSERT_SIZE"),
        mean: float("MEAN_INSERT_SIZE"),
        standard_deviation: float("STANDARD_DEVIATION"),
        read_pairs: int("READ_PAIRS"),
    })
}

/// Parse the stats file: a JSON array of per-task count entries. Rows
/// without a `task` key are summary lines and skipped.
pub fn parse_job_stats(body: &str) -> Result<Vec<JobStat>, LoadError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| LoadError::Parse(format!("stats file: {}", e)))?;
    let entries = value
        .as_array()
        .ok_or_else(|| LoadError::Parse("stats file is not an array".to_string()))?;
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let task = entry.get("task")?.as_str()?.to_string();
            Some(JobStat {
                task,
                reads_after: entry.get("reads_after").and_then(|v| v.as_i64()),
                bases_after: entry.get("bases_after").and_then(|v| v.as_i64()),
            })
        })
        .collect())
}

/// Row count of a JSON output: array length at the top level or under
/// the conventional `pipeline_output` wrapper, key count for maps.
pub fn count_rows(value: &serde_json::Value) -> usize {
    use serde_json::Value;
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => {
            if let Some(inner) = map.get("pipeline_output") {
                return count_rows(inner);
            }
            if let Some(Value::Array(items)) =
                map.values().find(|v| matches!(v, Value::Array(_)))
            {
                return items.len();
            }
            map.len()
        }
        _ => 0,
    }
}
