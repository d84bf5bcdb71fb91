use anyhow::{Context, Result};
use pipeline_monitor::cli::commands::{
    HistoryCommand, MonitorCommand, RerunCommand, StatusCommand,
};
use pipeline_monitor::cli::output::*;
use pipeline_monitor::cli::{Cli, Command};
use pipeline_monitor::monitor::{
    run_loader, ChannelLoaderQueue, LoadRequest, LogResultsObserver, PipelineMonitor,
    ResultMonitor, S3CachedResultsLoader, S3ResultLoader, WorkflowMonitor,
};
use pipeline_monitor::persistence::{InMemoryRunStore, RunStore};
use pipeline_monitor::aws::SfnCliClient;
use pipeline_monitor::{AegeaBatchClient, MonitorConfig, S3CliStore, Technology};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PIPELINE_MONITOR_CONFIG").ok());
    let config = match config_path {
        Some(path) => MonitorConfig::from_file(&path).context("Failed to load monitor config")?,
        None => MonitorConfig::default(),
    };

    match &cli.command {
        Command::Monitor(cmd) => run_monitor(cmd, &config).await?,
        Command::Status(cmd) => show_status(cmd, &config).await?,
        Command::History(cmd) => show_history(cmd, &config).await?,
        Command::Rerun(cmd) => rerun_workflow(cmd, &config).await?,
    }

    Ok(())
}

async fn open_store(config: &MonitorConfig, ephemeral: bool) -> Result<Arc<dyn RunStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryRunStore::new()));
    }
    #[cfg(feature = "sqlite")]
    {
        use pipeline_monitor::persistence::SqliteRunStore;
        let store = match &config.db_path {
            Some(path) => SqliteRunStore::new(path).await?,
            None => SqliteRunStore::with_default_path().await?,
        };
        return Ok(Arc::new(store));
    }
    #[cfg(not(feature = "sqlite"))]
    {
        let _ = config;
        Ok(Arc::new(InMemoryRunStore::new()))
    }
}

async fn run_monitor(cmd: &MonitorCommand, config: &MonitorConfig) -> Result<()> {
    let store = open_store(config, cmd.no_history).await?;

    let s3 = Arc::new(S3CliStore::new(&config.aws_path, config.command_timeout_secs));
    let batch = Arc::new(AegeaBatchClient::new(
        &config.aegea_path,
        config.command_timeout_secs,
    ));
    let sfn = Arc::new(SfnCliClient::new(
        &config.aws_path,
        config.command_timeout_secs,
    ));

    let (queue, rx) = ChannelLoaderQueue::new();
    spawn_loader_task(
        rx,
        Arc::clone(&store),
        Arc::new(S3ResultLoader::new(Arc::clone(&s3), &config.s3_bucket)),
    );

    let pipeline_monitor = PipelineMonitor::new(
        Arc::clone(&s3),
        Arc::clone(&batch),
        Arc::clone(&sfn),
        config.clone(),
    );
    let result_monitor = ResultMonitor::new(
        Arc::clone(&s3),
        Arc::new(queue),
        Arc::new(LogResultsObserver),
        config.clone(),
    );
    let workflow_monitor = WorkflowMonitor::new(
        Arc::clone(&s3),
        Arc::clone(&sfn),
        Arc::new(S3CachedResultsLoader::new(Arc::clone(&s3))),
    );

    let interval = cmd.interval.unwrap_or(config.poll_interval_secs);
    loop {
        sweep(&*store, &pipeline_monitor, &result_monitor, &workflow_monitor).await;
        if cmd.once {
            break;
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}

/// One pass over everything still in progress. Per-run failures are
/// logged and do not stop the sweep.
async fn sweep(
    store: &dyn RunStore,
    pipeline_monitor: &PipelineMonitor<S3CliStore, AegeaBatchClient, SfnCliClient>,
    result_monitor: &ResultMonitor<S3CliStore>,
    workflow_monitor: &WorkflowMonitor<S3CliStore, SfnCliClient>,
) {
    match store.pipeline_runs_in_progress().await {
        Ok(runs) => {
            for mut run in runs {
                let previous = store
                    .pipeline_runs_for_sample(run.sample_id)
                    .await
                    .unwrap_or_default();
                match run.technology {
                    Technology::Illumina => {
                        pipeline_monitor
                            .async_update_job_status(&mut run, &previous)
                            .await;
                    }
                    Technology::Nanopore => {
                        pipeline_monitor.update_single_stage_run_status(&mut run).await;
                    }
                }
                if let Err(e) = store.save_pipeline_run(&run).await {
                    error!("Saving pipeline run {}: {}", run.id, e);
                }
            }
        }
        Err(e) => error!("Listing in-progress pipeline runs: {}", e),
    }

    match store.results_in_progress().await {
        Ok(runs) => {
            for mut run in runs {
                result_monitor.monitor_results(&mut run).await;
                if let Err(e) = store.save_pipeline_run(&run).await {
                    error!("Saving pipeline run {}: {}", run.id, e);
                }
            }
        }
        Err(e) => error!("Listing in-progress results: {}", e),
    }

    match store.workflow_runs_in_progress().await {
        Ok(runs) => {
            for mut run in runs {
                workflow_monitor.update_status(&mut run, None).await;
                if let Err(e) = store.save_workflow_run(&run).await {
                    error!("Saving workflow run {}: {}", run.id, e);
                }
            }
        }
        Err(e) => error!("Listing in-progress workflow runs: {}", e),
    }
}

fn spawn_loader_task(
    mut rx: mpsc::UnboundedReceiver<LoadRequest>,
    store: Arc<dyn RunStore>,
    loader: Arc<S3ResultLoader<S3CliStore>>,
) {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match store.load_pipeline_run(request.run_id).await {
                Ok(Some(mut run)) => {
                    run_loader(&*loader, &mut run, request.output).await;
                    if let Err(e) = store.save_pipeline_run(&run).await {
                        error!("Saving pipeline run {}: {}", run.id, e);
                    }
                }
                Ok(None) => warn!("Queued run {} no longer exists", request.run_id),
                Err(e) => error!("Loading run {}: {}", request.run_id, e),
            }
        }
    });
}

async fn show_status(cmd: &StatusCommand, config: &MonitorConfig) -> Result<()> {
    let store = open_store(config, false).await?;
    let id = Uuid::parse_str(&cmd.run_id).context("Invalid run ID")?;

    let run = store
        .load_pipeline_run(id)
        .await?
        .with_context(|| format!("No pipeline run with ID {}", id))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!("{}", format_run_detail(&run));
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, config: &MonitorConfig) -> Result<()> {
    let store = open_store(config, false).await?;

    let mut runs = match cmd.sample {
        Some(sample_id) => store.pipeline_runs_for_sample(sample_id).await?,
        None => store.list_pipeline_runs(cmd.limit).await?,
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("{} No runs recorded", INFO);
        return Ok(());
    }
    for run in &runs {
        println!("{}", format_run_summary(run));
    }
    Ok(())
}

async fn rerun_workflow(cmd: &RerunCommand, config: &MonitorConfig) -> Result<()> {
    let store = open_store(config, false).await?;
    let id = Uuid::parse_str(&cmd.workflow_run_id).context("Invalid workflow run ID")?;

    let mut run = store
        .load_workflow_run(id)
        .await?
        .with_context(|| format!("No workflow run with ID {}", id))?;

    let replacement = run.rerun()?;
    store.save_workflow_run(&run).await?;
    store.save_workflow_run(&replacement).await?;

    println!("{} Deprecated {}", WARN, format_workflow_run(&run));
    println!("{} Dispatched {}", CHECK, format_workflow_run(&replacement));
    Ok(())
}
