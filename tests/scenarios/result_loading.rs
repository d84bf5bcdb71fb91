//! Test: the result monitor state machine and the output loaders

use crate::helpers::*;
use chrono::{Duration, Utc};
use pipeline_monitor::core::{LoadState, OutputKind, PipelineRun, ResultsFinalized, Technology};
use pipeline_monitor::monitor::{
    run_loader, LogResultsObserver, ResultMonitor, S3ResultLoader,
};
use std::sync::Arc;

fn make_result_monitor(
    store: &Arc<MockObjectStore>,
    queue: &Arc<RecordingLoaderQueue>,
) -> ResultMonitor<MockObjectStore> {
    ResultMonitor::new(
        Arc::clone(store),
        Arc::clone(queue) as Arc<dyn pipeline_monitor::monitor::LoaderQueue>,
        Arc::new(LogResultsObserver),
        test_config(),
    )
}

const PICARD_METRICS: &str = "\
## METRICS CLASS\tpicard.analysis.InsertSizeMetrics
MEDIAN_INSERT_SIZE\tMODE_INSERT_SIZE\tMEDIAN_ABSOLUTE_DEVIATION\tMIN_INSERT_SIZE\tMAX_INSERT_SIZE\tMEAN_INSERT_SIZE\tSTANDARD_DEVIATION\tREAD_PAIRS
250\t245\t30\t33\t717\t252.2\t51.8\t1109\n";

/// The version file is only trusted once it is newer than the run.
#[tokio::test]
async fn test_pipeline_version_resolution() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = PipelineRun::new(20, Technology::Illumina);
    let version_file = paths_for(&run).pipeline_version_file();

    // stale file from a previous run
    store.put_with_modified(&version_file, "7.1.3\n", Utc::now() - Duration::hours(2));
    monitor.monitor_results(&mut run).await;
    assert!(run.pipeline_version.is_none());

    // the current run wrote it
    store.put(&version_file, "8.1.2\n");
    monitor.monitor_results(&mut run).await;
    assert_eq!(run.pipeline_version.as_deref(), Some("8.1"));
}

/// A run that died before ever writing its version file still has to
/// reach a terminal result state instead of being polled forever.
#[tokio::test]
async fn test_finalized_run_without_version_still_finalizes_results() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = PipelineRun::new(26, Technology::Illumina);
    run.finalize_failed();

    monitor.monitor_results(&mut run).await;

    assert!(run.pipeline_version.is_none());
    assert_eq!(run.results_finalized, Some(ResultsFinalized::FinalizedFail));
    assert!(queue.take().is_empty());
}

/// Outputs that exist in S3 get queued for loading.
#[tokio::test]
async fn test_present_outputs_are_enqueued() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = illumina_run(21);
    let paths = paths_for(&run);
    store.put(&paths.s3_file_for(OutputKind::TaxonCounts), "{}");
    store.put(&paths.s3_file_for(OutputKind::ErccCounts), "");

    monitor.monitor_results(&mut run).await;

    let queued: Vec<OutputKind> = queue.take().into_iter().map(|r| r.output).collect();
    assert!(queued.contains(&OutputKind::TaxonCounts));
    assert!(queued.contains(&OutputKind::ErccCounts));
    assert_eq!(
        run.output_state(OutputKind::TaxonCounts).unwrap().state,
        LoadState::LoadingQueued
    );
    // absent outputs stay unknown while the run is in progress
    assert_eq!(
        run.output_state(OutputKind::ContigCounts).unwrap().state,
        LoadState::Unknown
    );
    assert!(!run.results_finalized());
}

/// After finalization and the settling period, missing outputs fail
/// and the run's results finalize as a failure. Absent insert size
/// metrics alone are tolerated.
#[tokio::test]
async fn test_missing_outputs_fail_after_finalization() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = illumina_run(22);
    run.finalize_checked();

    monitor.monitor_results(&mut run).await;

    assert_eq!(
        run.output_state(OutputKind::TaxonCounts).unwrap().state,
        LoadState::Failed
    );
    assert_eq!(
        run.output_state(OutputKind::InsertSizeMetrics).unwrap().state,
        LoadState::Loaded
    );
    assert_eq!(run.results_finalized, Some(ResultsFinalized::FinalizedFail));

    // terminal results never flip back
    let before = run.results_finalized;
    monitor.monitor_results(&mut run).await;
    assert_eq!(run.results_finalized, before);
}

/// Insert size metrics moved under the versioned prefix in newer
/// pipelines; the monitor finds them there.
#[tokio::test]
async fn test_insert_size_metrics_versioned_location() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = illumina_run(23);
    run.finalize_checked();
    store.put(
        &paths_for(&run).versioned_insert_size_metrics(),
        PICARD_METRICS,
    );

    monitor.monitor_results(&mut run).await;

    assert_eq!(
        run.output_state(OutputKind::InsertSizeMetrics).unwrap().state,
        LoadState::LoadingQueued
    );
    assert!(queue
        .take()
        .iter()
        .any(|r| r.output == OutputKind::InsertSizeMetrics));
}

/// Full happy path: every output lands, loads, and the results
/// finalize successfully.
#[tokio::test]
async fn test_all_outputs_loaded_finalizes_success() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);
    let loader = S3ResultLoader::new(Arc::clone(&store), "test-bucket");

    let mut run = illumina_run(24);
    run.finalize_checked();
    let paths = paths_for(&run);

    store.put(
        &paths.s3_file_for(OutputKind::ErccCounts),
        "ERCC-00002\t50\nERCC-00003\t25\nACTB\t900\n",
    );
    store.put(
        &paths.s3_file_for(OutputKind::TaxonCounts),
        r#"{"pipeline_output": {"taxon_counts_attributes": [{}, {}, {}]}}"#,
    );
    store.put(
        &paths.s3_file_for(OutputKind::TaxonByteranges),
        r#"{"562": {"NT": [0, 100]}}"#,
    );
    store.put(
        &paths.s3_file_for(OutputKind::ContigCounts),
        r#"[{"contig": "c1"}, {"contig": "c2"}]"#,
    );
    store.put(
        &paths.s3_file_for(OutputKind::AccessionCoverageStats),
        r#"{"NC_001": {}}"#,
    );
    store.put(
        &paths.s3_file_for(OutputKind::InsertSizeMetrics),
        PICARD_METRICS,
    );
    store.put(
        &paths.stats_json(),
        r#"[{"task": "unidentified_fastq", "reads_after": 2000}]"#,
    );

    monitor.monitor_results(&mut run).await;
    for request in queue.take() {
        run_loader(&loader, &mut run, request.output).await;
    }
    monitor.monitor_results(&mut run).await;

    assert!(run.all_output_states_loaded());
    assert_eq!(
        run.results_finalized,
        Some(ResultsFinalized::FinalizedSuccess)
    );
    assert!(run.ready_for_cache());
    assert_eq!(run.total_ercc_reads, Some(75));
    assert_eq!(
        run.insert_size_metrics.as_ref().unwrap().median,
        Some(250)
    );
    assert_eq!(
        run.output_state(OutputKind::TaxonCounts).unwrap().rows_loaded,
        Some(3)
    );
    assert_eq!(run.job_stats.len(), 1);
    assert_eq!(run.job_stats[0].task, "unidentified_fastq");
    assert!(run.report_ready());
}

/// Even with every output loaded, a stats file that cannot be compiled
/// fails results finalization.
#[tokio::test]
async fn test_corrupt_stats_file_fails_finalization() {
    let store = Arc::new(MockObjectStore::new());
    let queue = Arc::new(RecordingLoaderQueue::new());
    let monitor = make_result_monitor(&store, &queue);

    let mut run = illumina_run(27);
    run.finalize_checked();
    for output_state in run.output_states.iter_mut() {
        output_state.state = LoadState::Loaded;
    }
    store.put(&paths_for(&run).stats_json(), "not json");

    monitor.monitor_results(&mut run).await;

    assert_eq!(run.results_finalized, Some(ResultsFinalized::FinalizedFail));
}

/// A corrupt output file records a loading error, which a later sweep
/// can retry.
#[tokio::test]
async fn test_corrupt_output_records_loading_error() {
    let store = Arc::new(MockObjectStore::new());
    let loader = S3ResultLoader::new(Arc::clone(&store), "test-bucket");

    let mut run = illumina_run(25);
    store.put(
        &paths_for(&run).s3_file_for(OutputKind::TaxonCounts),
        "not json at all",
    );

    run_loader(&loader, &mut run, OutputKind::TaxonCounts).await;
    assert_eq!(
        run.output_state(OutputKind::TaxonCounts).unwrap().state,
        LoadState::LoadingError
    );
}
