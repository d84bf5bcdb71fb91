//! Test: failure classification, automatic restarts, retry caps

use crate::helpers::*;
use pipeline_monitor::core::{StageStatus, MAX_STAGE_RETRIES};
use pipeline_monitor::monitor::FailureAction;
use std::sync::Arc;

/// A failed marker file finalizes the run as FAILED.
#[tokio::test]
async fn test_failed_marker_finalizes_run() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(10);
    monitor.update_job_status(&mut run, &[]).await;
    let job_id = run.stages[0].job_id.clone().unwrap();
    store.put(&paths_for(&run).stage_failed_marker(&job_id), "");

    monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Failed));
    assert!(!run.finalized());

    let action = monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(action, Some(FailureAction::Reported));
    assert!(run.finalized());
    assert!(run.failed());
    assert_eq!(run.job_status.as_deref(), Some("FAILED"));
}

/// A first-stage failure with an invalid input report is the user's
/// problem, not ours.
#[tokio::test]
async fn test_invalid_input_is_a_known_user_error() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(11);
    run.stages[0].job_status = Some(StageStatus::Failed);
    store.put(
        &paths_for(&run).invalid_step_input(),
        "input file is not fastq",
    );

    let action = monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(action, Some(FailureAction::KnownUserError));
    assert!(run.failed());
    assert_eq!(run.known_user_error.as_deref(), Some("FAULTY_INPUT"));
    assert_eq!(run.error_message.as_deref(), Some("input file is not fastq"));
}

/// Allow-listed stages restart automatically on a mainline run with no
/// prior same-version failure.
#[tokio::test]
async fn test_automatic_restart_resets_and_resubmits() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let mut config = test_config();
    config.auto_restart_stages = vec![2];
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, config);

    let mut run = illumina_run(12);
    run.stages[0].job_status = Some(StageStatus::Succeeded);
    run.stages[1].job_status = Some(StageStatus::Failed);
    run.stages[1].job_id = Some("job-dead".to_string());

    let action = monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(action, Some(FailureAction::AutoRestarted));
    assert!(!run.finalized());
    assert_eq!(run.stages[1].job_status, Some(StageStatus::Started));
    assert_eq!(batch.submission_count(), 1);
}

/// A run restarts automatically at most once. A second failure of the
/// same run is reported, not resubmitted forever.
#[tokio::test]
async fn test_automatic_restart_happens_once() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let mut config = test_config();
    config.auto_restart_stages = vec![1];
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, config);

    let mut run = illumina_run(20);
    run.stages[0].job_status = Some(StageStatus::Failed);
    run.stages[0].job_id = Some("job-dead".to_string());

    let action = monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(action, Some(FailureAction::AutoRestarted));
    assert!(run.auto_restarted);
    assert_eq!(batch.submission_count(), 1);

    // the resubmitted job fails too
    run.stages[0].job_status = Some(StageStatus::Failed);
    let action = monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(action, Some(FailureAction::Reported));
    assert!(run.finalized());
    assert_eq!(batch.submission_count(), 1);
}

/// No automatic restart when the stage is not allow-listed, the branch
/// is not mainline, or the sample already failed on this version.
#[tokio::test]
async fn test_automatic_restart_denied() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let mut config = test_config();
    config.auto_restart_stages = vec![1];
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, config);

    // feature branch
    let mut branch_run = illumina_run(13);
    branch_run.pipeline_branch = Some("experimental".to_string());
    branch_run.stages[0].job_status = Some(StageStatus::Failed);
    let action = monitor.update_job_status(&mut branch_run, &[]).await;
    assert_eq!(action, Some(FailureAction::Reported));

    // stage not allow-listed
    let mut stage_run = illumina_run(14);
    stage_run.stages[0].job_status = Some(StageStatus::Succeeded);
    stage_run.stages[1].job_status = Some(StageStatus::Failed);
    let action = monitor.update_job_status(&mut stage_run, &[]).await;
    assert_eq!(action, Some(FailureAction::Reported));

    // an earlier run of the same version already failed
    let mut previous = illumina_run(15);
    previous.finalize_failed();
    let mut repeat_run = illumina_run(15);
    repeat_run.stages[0].job_status = Some(StageStatus::Failed);
    let action = monitor
        .update_job_status(&mut repeat_run, std::slice::from_ref(&previous))
        .await;
    assert_eq!(action, Some(FailureAction::Reported));

    assert_eq!(batch.submission_count(), 0);
}

/// Host terminations resubmit the stage job until the retry cap; past
/// it the stage keeps its last status and waits for an operator.
#[tokio::test]
async fn test_host_termination_retries_until_cap() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(16);
    monitor.update_job_status(&mut run, &[]).await;

    for attempt in 1..=MAX_STAGE_RETRIES {
        batch.push_status("FAILED", Some("Host EC2 (instance i-012) terminated."));
        monitor.update_job_status(&mut run, &[]).await;
        assert_eq!(run.stages[0].failed_attempts(), attempt);
    }

    // the first submission plus one resubmit per tolerated termination
    assert_eq!(batch.submission_count(), MAX_STAGE_RETRIES);
    // exhausting the cap does not fail the stage
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Started));
    assert!(!run.finalized());
}

/// A describe stderr naming IndexError means the job id is gone for
/// good; anything else is transient.
#[tokio::test]
async fn test_describe_error_classification() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, test_config());

    let mut run = illumina_run(17);
    monitor.update_job_status(&mut run, &[]).await;

    batch.push_describe(Err(pipeline_monitor::AwsError::CommandFailed {
        command: "aegea batch describe job-0".to_string(),
        code: 1,
        stderr: "Traceback ... IndexError: list index out of range".to_string(),
    }));
    monitor.update_job_status(&mut run, &[]).await;
    assert_eq!(run.stages[0].job_status, Some(StageStatus::Failed));

    let mut transient = illumina_run(18);
    monitor.update_job_status(&mut transient, &[]).await;
    batch.push_describe(Err(pipeline_monitor::AwsError::Timeout(30)));
    monitor.update_job_status(&mut transient, &[]).await;
    assert_eq!(transient.stages[0].job_status, Some(StageStatus::Error));
}

/// The long-run alert fires once.
#[tokio::test]
async fn test_long_run_alert_sent_once() {
    let store = Arc::new(MockObjectStore::new());
    let batch = Arc::new(MockBatchClient::new());
    let sfn = Arc::new(MockSfnClient::new());
    let mut config = test_config();
    config.long_run_alert_hours = 0.0;
    let monitor = make_pipeline_monitor(&store, &batch, &sfn, config);

    let mut run = illumina_run(19);
    monitor.update_job_status(&mut run, &[]).await;
    assert!(run.alert_sent);
}
