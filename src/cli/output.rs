//! CLI output formatting

use crate::core::{LoadState, OutputState, PipelineRun, WorkflowRun, WorkflowRunStatus};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");

/// Format a load state for display
pub fn format_load_state(state: LoadState) -> String {
    match state {
        LoadState::Unknown => style("UNKNOWN").dim().to_string(),
        LoadState::LoadingQueued => style("QUEUED").yellow().to_string(),
        LoadState::Loading => style("LOADING").yellow().to_string(),
        LoadState::Loaded => style("LOADED").green().to_string(),
        LoadState::LoadingError => style("LOAD ERROR").red().to_string(),
        LoadState::Failed => style("FAILED").red().to_string(),
    }
}

/// Format one output state line
pub fn format_output_state(os: &OutputState) -> String {
    let rows = os
        .rows_loaded
        .map(|n| format!(" ({} rows)", n))
        .unwrap_or_default();
    format!(
        "  {} {}{}",
        format_load_state(os.state),
        os.output,
        style(rows).dim()
    )
}

/// One-line summary of a pipeline run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let icon = if run.failed() {
        CROSS
    } else if run.finalized() {
        CHECK
    } else {
        SPINNER
    };
    format!(
        "{} {} - sample {} - {} - v{} - {:.2}h",
        icon,
        style(&run.id.to_string()[..8]).dim(),
        style(run.sample_id).bold(),
        run.job_status_display(),
        run.pipeline_version.as_deref().unwrap_or("?"),
        run.duration_hrs()
    )
}

/// Multi-line detail view of a pipeline run
pub fn format_run_detail(run: &PipelineRun) -> String {
    let mut lines = vec![
        format_run_summary(run),
        format!(
            "  job status: {}",
            style(run.job_status.as_deref().unwrap_or("-")).bold()
        ),
    ];
    for stage in &run.stages {
        let status = stage
            .job_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "  {}. {} [{}] {}",
            stage.step_number,
            stage.name,
            status,
            style(stage.job_id.as_deref().unwrap_or("")).dim()
        ));
    }
    for os in &run.output_states {
        lines.push(format_output_state(os));
    }
    lines.join("\n")
}

/// One-line summary of a workflow run
pub fn format_workflow_run(run: &WorkflowRun) -> String {
    let icon = match run.status {
        WorkflowRunStatus::Succeeded => CHECK,
        WorkflowRunStatus::SucceededWithIssue => WARN,
        WorkflowRunStatus::Failed => CROSS,
        _ => SPINNER,
    };
    format!(
        "{} {} - sample {} - {} - {}",
        icon,
        style(&run.id.to_string()[..8]).dim(),
        style(run.sample_id).bold(),
        run.workflow_version_tag(),
        run.status
    )
}
