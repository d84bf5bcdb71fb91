//! Persistence layer for pipeline and workflow runs

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{PipelineRun, WorkflowRun};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for run storage backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Save a pipeline run, replacing any previous version
    async fn save_pipeline_run(&self, run: &PipelineRun) -> Result<()>;

    /// Load a pipeline run by ID
    async fn load_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRun>>;

    /// Runs the pipeline monitor still needs to tick: not finalized,
    /// not deprecated
    async fn pipeline_runs_in_progress(&self) -> Result<Vec<PipelineRun>>;

    /// Runs the result monitor still needs to tick: results not
    /// finalized, not deprecated
    async fn results_in_progress(&self) -> Result<Vec<PipelineRun>>;

    /// All pipeline runs for a sample, newest first
    async fn pipeline_runs_for_sample(&self, sample_id: i64) -> Result<Vec<PipelineRun>>;

    /// Most recent pipeline runs across samples, newest first
    async fn list_pipeline_runs(&self, limit: usize) -> Result<Vec<PipelineRun>>;

    /// Save a workflow run, replacing any previous version
    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<()>;

    /// Load a workflow run by ID
    async fn load_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>>;

    /// Workflow runs not yet in a terminal status and not deprecated
    async fn workflow_runs_in_progress(&self) -> Result<Vec<WorkflowRun>>;
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryRunStore {
    pipeline_runs: RwLock<HashMap<Uuid, PipelineRun>>,
    workflow_runs: RwLock<HashMap<Uuid, WorkflowRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            pipeline_runs: RwLock::new(HashMap::new()),
            workflow_runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_pipeline_run(&self, run: &PipelineRun) -> Result<()> {
        self.pipeline_runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.pipeline_runs.read().await.get(&id).cloned())
    }

    async fn pipeline_runs_in_progress(&self) -> Result<Vec<PipelineRun>> {
        let runs = self.pipeline_runs.read().await;
        let mut in_progress: Vec<PipelineRun> = runs
            .values()
            .filter(|r| !r.finalized() && !r.deprecated)
            .cloned()
            .collect();
        in_progress.sort_by_key(|r| r.created_at);
        Ok(in_progress)
    }

    async fn results_in_progress(&self) -> Result<Vec<PipelineRun>> {
        let runs = self.pipeline_runs.read().await;
        let mut in_progress: Vec<PipelineRun> = runs
            .values()
            .filter(|r| !r.results_finalized() && !r.deprecated)
            .cloned()
            .collect();
        in_progress.sort_by_key(|r| r.created_at);
        Ok(in_progress)
    }

    async fn pipeline_runs_for_sample(&self, sample_id: i64) -> Result<Vec<PipelineRun>> {
        let runs = self.pipeline_runs.read().await;
        let mut matching: Vec<PipelineRun> = runs
            .values()
            .filter(|r| r.sample_id == sample_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(matching)
    }

    async fn list_pipeline_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let runs = self.pipeline_runs.read().await;
        let mut all: Vec<PipelineRun> = runs.values().cloned().collect();
        all.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<()> {
        self.workflow_runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>> {
        Ok(self.workflow_runs.read().await.get(&id).cloned())
    }

    async fn workflow_runs_in_progress(&self) -> Result<Vec<WorkflowRun>> {
        let runs = self.workflow_runs.read().await;
        let mut in_progress: Vec<WorkflowRun> = runs
            .values()
            .filter(|r| !r.finalized() && !r.deprecated)
            .cloned()
            .collect();
        in_progress.sort_by_key(|r| r.created_at);
        Ok(in_progress)
    }
}
