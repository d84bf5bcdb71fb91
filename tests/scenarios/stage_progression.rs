//! Test: a run progresses stage by stage to CHECKED

use crate::helpers::*;
use pipeline_monitor::core::StageStatus;
use std::sync::Arc;

/// Drive a run through all four stages using succeeded marker files.
#[tokio::test]
async fn test_run_advances_through_stages_to_checked() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(1);

    // First tick submits the first stage
    monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Started));
    assert_eq!(run.stages[0].job_id.as_deref(), Some("job-0"));
    assert_eq!(run.job_status.as_deref(), Some("1.Host Filtering-STARTED"));

    // Each stage succeeds through its marker file; the next tick starts
    // the successor.
    for _ in 0..4 {
        let index = run.active_stage_index().unwrap();
        let job_id = run.stages[index].job_id.clone().unwrap();
        store.put(&paths_for(&run).stage_succeeded_marker(&job_id), "");
        monitor.async_update_job_status(&mut run, &[]).await;
    }

    assert!(run.finalized());
    assert_eq!(run.job_status.as_deref(), Some("CHECKED"));
    assert!(run.stages.iter().all(|s| s.succeeded()));
    assert!(run.time_to_finalized.is_some());

    // One submission per stage, and every completed job was reclaimed
    assert_eq!(batch.submission_count(), 4);
    assert_eq!(batch.terminated().len(), 4);
}

/// The himem queue only carries the alignment stage.
#[tokio::test]
async fn test_alignment_routes_to_himem_queue() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let config = test_config();
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, config.clone());

    let mut run = illumina_run(2);
    monitor.update_job_status(&mut run, &[]).await;
    let job_id = run.stages[0].job_id.clone().unwrap();
    store.put(&paths_for(&run).stage_succeeded_marker(&job_id), "");
    monitor.async_update_job_status(&mut run, &[]).await;

    let submissions = batch.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].1.queue, config.batch_queue);
    assert_eq!(submissions[1].1.queue, config.batch_himem_queue);
    assert!(submissions[1].0.contains("non_host_alignment"));
}

/// While a stage runs, the scheduler's answer updates the display
/// status.
#[tokio::test]
async fn test_describe_updates_running_status() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(3);
    monitor.update_job_status(&mut run, &[]).await;

    batch.push_status("RUNNING", None);
    monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Running));
    assert_eq!(run.job_status.as_deref(), Some("1.Host Filtering-RUNNING"));

    // A queued job keeps reporting RUNNABLE
    batch.push_status("PENDING", None);
    monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Runnable));
}

/// The long-read pipeline is one Step Functions execution; terminal
/// remote statuses finalize the run directly.
#[tokio::test]
async fn test_single_stage_run_follows_execution_status() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = pipeline_monitor::core::PipelineRun::new(
        6,
        pipeline_monitor::core::Technology::Nanopore,
    );
    run.pipeline_version = Some("0.7".to_string());
    run.sfn_execution_arn = Some("arn:aws:states:us-west-2:1:execution:mngs:a".to_string());

    sfn.push_status("RUNNING");
    monitor.update_single_stage_run_status(&mut run).await;
    assert!(!run.finalized());
    assert_eq!(run.job_status.as_deref(), Some("RUNNING"));

    sfn.push_status("SUCCEEDED");
    monitor.update_single_stage_run_status(&mut run).await;
    assert!(run.finalized());
    assert_eq!(run.job_status.as_deref(), Some("CHECKED"));
    assert_eq!(batch.submission_count(), 0);
}

/// A timed-out execution with a recognized error file records the user
/// error instead of paging anyone.
#[tokio::test]
async fn test_single_stage_failure_with_input_error() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = pipeline_monitor::core::PipelineRun::new(
        7,
        pipeline_monitor::core::Technology::Nanopore,
    );
    run.pipeline_version = Some("0.7".to_string());
    run.sfn_execution_arn = Some("arn:aws:states:us-west-2:1:execution:mngs:b".to_string());
    store.put(
        &paths_for(&run).sfn_error_file(),
        "label: InsufficientReadsError\nmessage: Insufficient reads\n",
    );

    sfn.push_status("TIMED_OUT");
    monitor.update_single_stage_run_status(&mut run).await;
    assert!(run.finalized());
    assert!(run.failed());
    assert_eq!(
        run.known_user_error.as_deref(),
        Some("InsufficientReadsError")
    );
}

/// Deprecated and finalized runs are left untouched.
#[tokio::test]
async fn test_finalized_and_deprecated_runs_are_skipped() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut deprecated = illumina_run(4);
    deprecated.deprecated = true;
    monitor.update_job_status(&mut deprecated, &[]).await;
    assert_eq!(batch.submission_count(), 0);

    let mut finalized = illumina_run(5);
    finalized.finalize_checked();
    monitor.update_job_status(&mut finalized, &[]).await;
    assert_eq!(batch.submission_count(), 0);
}
