//! SQLite-based run store

use crate::core::{PipelineRun, ResultsFinalized, WorkflowRun};
use crate::persistence::RunStore;
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite run store. The full run is stored as JSON in a body column;
/// the columns beside it are denormalized for the monitor queries.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("pipeline-monitor");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                sample_id INTEGER NOT NULL,
                job_status TEXT,
                finalized INTEGER NOT NULL DEFAULT 0,
                results_finalized INTEGER NOT NULL DEFAULT 0,
                deprecated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pr_sample_id ON pipeline_runs(sample_id);
            CREATE INDEX IF NOT EXISTS idx_pr_finalized ON pipeline_runs(finalized);
            CREATE INDEX IF NOT EXISTS idx_pr_results ON pipeline_runs(results_finalized);

            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                sample_id INTEGER NOT NULL,
                workflow TEXT NOT NULL,
                status TEXT NOT NULL,
                deprecated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_wr_sample_id ON workflow_runs(sample_id);
            CREATE INDEX IF NOT EXISTS idx_wr_status ON workflow_runs(status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn pipeline_run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PipelineRun> {
        let body: String = row.get("body");
        serde_json::from_str(&body).context("Failed to deserialize pipeline run")
    }

    fn workflow_run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowRun> {
        let body: String = row.get("body");
        serde_json::from_str(&body).context("Failed to deserialize workflow run")
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save_pipeline_run(&self, run: &PipelineRun) -> Result<()> {
        let body = serde_json::to_string(run).context("Failed to serialize pipeline run")?;
        let results_finalized = run
            .results_finalized
            .unwrap_or(ResultsFinalized::InProgress)
            .as_i64();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pipeline_runs
            (id, sample_id, job_status, finalized, results_finalized, deprecated, created_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.sample_id)
        .bind(run.job_status.as_deref())
        .bind(run.finalized)
        .bind(results_finalized)
        .bind(run.deprecated)
        .bind(run.created_at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline run")?;

        Ok(())
    }

    async fn load_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT body FROM pipeline_runs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline run")?;

        row.as_ref().map(Self::pipeline_run_from_row).transpose()
    }

    async fn pipeline_runs_in_progress(&self) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM pipeline_runs
            WHERE finalized = 0 AND deprecated = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query in-progress pipeline runs")?;

        rows.iter().map(Self::pipeline_run_from_row).collect()
    }

    async fn results_in_progress(&self) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM pipeline_runs
            WHERE results_finalized = 0 AND deprecated = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query in-progress results")?;

        rows.iter().map(Self::pipeline_run_from_row).collect()
    }

    async fn pipeline_runs_for_sample(&self, sample_id: i64) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM pipeline_runs
            WHERE sample_id = ?1
            ORDER BY created_at DESC
            "#,
        )
        .bind(sample_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query sample's pipeline runs")?;

        rows.iter().map(Self::pipeline_run_from_row).collect()
    }

    async fn list_pipeline_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM pipeline_runs
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipeline runs")?;

        rows.iter().map(Self::pipeline_run_from_row).collect()
    }

    async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<()> {
        let body = serde_json::to_string(run).context("Failed to serialize workflow run")?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO workflow_runs
            (id, sample_id, workflow, status, deprecated, created_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.sample_id)
        .bind(run.workflow.as_str())
        .bind(run.status.as_str())
        .bind(run.deprecated)
        .bind(run.created_at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await
        .context("Failed to save workflow run")?;

        Ok(())
    }

    async fn load_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query("SELECT body FROM workflow_runs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load workflow run")?;

        row.as_ref().map(Self::workflow_run_from_row).transpose()
    }

    async fn workflow_runs_in_progress(&self) -> Result<Vec<WorkflowRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM workflow_runs
            WHERE status IN ('CREATED', 'RUNNING') AND deprecated = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query in-progress workflow runs")?;

        rows.iter().map(Self::workflow_run_from_row).collect()
    }
}
