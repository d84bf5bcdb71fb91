//! Test: workflow run status mapping, input errors, reruns

use crate::helpers::*;
use async_trait::async_trait;
use pipeline_monitor::core::{WorkflowError, WorkflowKind, WorkflowRun, WorkflowRunStatus};
use pipeline_monitor::monitor::{CachedResultsLoader, WorkflowMonitor};
use std::sync::Arc;

struct FixedResultsLoader(Option<String>);

#[async_trait]
impl CachedResultsLoader for FixedResultsLoader {
    async fn load(&self, _run: &WorkflowRun) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

fn make_workflow_monitor(
    store: &Arc<MockObjectStore>,
    sfn: &Arc<MockSfnClient>,
    cached_results: Option<&str>,
) -> WorkflowMonitor<MockObjectStore, MockSfnClient> {
    WorkflowMonitor::new(
        Arc::clone(store),
        Arc::clone(sfn),
        Arc::new(FixedResultsLoader(cached_results.map(String::from))),
    )
}

fn consensus_genome_run(sample_id: i64) -> WorkflowRun {
    let mut run = WorkflowRun::new(sample_id, WorkflowKind::ConsensusGenome);
    run.sfn_execution_arn = Some("arn:aws:states:us-west-2:1:execution:cg:x".to_string());
    run.s3_output_prefix = Some(format!("s3://test-bucket/cg/{}", sample_id));
    run
}

/// Remote RUNNING maps straight through.
#[tokio::test]
async fn test_running_status_applied() {
    let store = Arc::new(MockObjectStore::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_workflow_monitor(&store, &sfn, None);

    let mut run = consensus_genome_run(30);
    sfn.push_status("RUNNING");
    monitor.update_status(&mut run, None).await;
    assert_eq!(run.status, WorkflowRunStatus::Running);
    assert!(!run.finalized());
}

/// TIMED_OUT, ABORTED and FAILED all collapse to a local failure.
#[tokio::test]
async fn test_remote_failures_collapse() {
    for remote in ["TIMED_OUT", "ABORTED", "FAILED"] {
        let store = Arc::new(MockObjectStore::new());
        let sfn = Arc::new(MockSfnClient::new());
        let monitor = make_workflow_monitor(&store, &sfn, None);

        let mut run = consensus_genome_run(31);
        monitor.update_status(&mut run, Some(remote)).await;
        assert_eq!(run.status, WorkflowRunStatus::Failed, "remote {}", remote);
    }
}

/// A failure whose error file names a recognized input problem becomes
/// SUCCEEDED_WITH_ISSUE. The message shown to the user comes from the
/// fixed label table, never from the raw error blob.
#[tokio::test]
async fn test_known_input_error_succeeds_with_issue() {
    let store = Arc::new(MockObjectStore::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_workflow_monitor(&store, &sfn, None);

    let mut run = consensus_genome_run(32);
    store.put(
        "s3://test-bucket/cg/32/error.yml",
        "label: InsufficientReadsError\nmessage: 'wdl task ncbi_filter: exit 42'\n",
    );

    monitor.update_status(&mut run, Some("FAILED")).await;
    assert_eq!(run.status, WorkflowRunStatus::SucceededWithIssue);
    assert_eq!(run.error_label.as_deref(), Some("InsufficientReadsError"));
    assert_eq!(
        run.error_message.as_deref(),
        pipeline_monitor::core::known_input_error("InsufficientReadsError")
    );
}

/// An unrecognized error label does not soften the failure.
#[tokio::test]
async fn test_unknown_error_label_still_fails() {
    let store = Arc::new(MockObjectStore::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_workflow_monitor(&store, &sfn, None);

    let mut run = consensus_genome_run(33);
    store.put(
        "s3://test-bucket/cg/33/error.yml",
        "label: SegmentationFault\n",
    );

    monitor.update_status(&mut run, Some("FAILED")).await;
    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert!(run.error_label.is_none());
}

/// Success loads the cached result summary onto the run.
#[tokio::test]
async fn test_success_loads_cached_results() {
    let store = Arc::new(MockObjectStore::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_workflow_monitor(&store, &sfn, Some(r#"{"coverage_depth": 31.4}"#));

    let mut run = consensus_genome_run(34);
    monitor.update_status(&mut run, Some("SUCCEEDED")).await;
    assert_eq!(run.status, WorkflowRunStatus::Succeeded);
    assert_eq!(
        run.cached_results.as_deref(),
        Some(r#"{"coverage_depth": 31.4}"#)
    );
}

/// Once finalized, later pushed statuses are ignored.
#[tokio::test]
async fn test_finalized_status_is_sticky() {
    let store = Arc::new(MockObjectStore::new());
    let sfn = Arc::new(MockSfnClient::new());
    let monitor = make_workflow_monitor(&store, &sfn, None);

    let mut run = consensus_genome_run(35);
    monitor.update_status(&mut run, Some("SUCCEEDED")).await;
    monitor.update_status(&mut run, Some("FAILED")).await;
    assert_eq!(run.status, WorkflowRunStatus::Succeeded);
}

/// Rerunning deprecates the old run and copies the inputs onto the
/// replacement. Rerunning twice is rejected.
#[tokio::test]
async fn test_rerun_deprecates_and_copies_inputs() {
    let mut run = consensus_genome_run(36);
    run.inputs_json = Some(r#"{"accession_id": "MN908947.3"}"#.to_string());

    let replacement = run.rerun().unwrap();
    assert!(run.deprecated);
    assert_eq!(replacement.rerun_from, Some(run.id));
    assert_eq!(replacement.inputs_json, run.inputs_json);
    assert_eq!(replacement.status, WorkflowRunStatus::Created);

    assert!(matches!(
        run.rerun(),
        Err(WorkflowError::RerunDeprecatedWorkflow)
    ));
}
