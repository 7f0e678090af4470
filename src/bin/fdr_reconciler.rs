//! fdr-reconciler: settlement flow acquisition and reconciliation node.
//!
//! ## Usage
//! ```text
//! fdr-reconciler                    # serve: scheduler + trigger watcher
//! fdr-reconciler run-once [--force] # one manual run in the foreground
//! ```
//!
//! Configuration is read from `config.yaml`, the file named by
//! `FDR_CONFIG`, and `FDR__*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use fdr_reconciler::clients::{HttpFlowSource, HttpFlowSourceConfig, InstrumentedFlowSource};
use fdr_reconciler::config::{Config, CONFIG_ENV_VAR};
use fdr_reconciler::coordinator::ExecutionCoordinator;
use fdr_reconciler::events::build_sink;
use fdr_reconciler::interfaces::FlowSource;
use fdr_reconciler::model::ExecutionStatus;
use fdr_reconciler::pipeline::Pipeline;
use fdr_reconciler::storage::{init_storage, Stores};
use fdr_reconciler::trigger::{IntervalScheduler, ManualTrigger, MarkerWatcher, TriggerResponse};
use fdr_reconciler::utils::bootstrap::{init_tracing, shutdown_signal};

const RUN_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum Mode {
    Serve,
    RunOnce { force: bool },
}

fn parse_mode() -> Result<Mode, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => Ok(Mode::Serve),
        Some("run-once") => match args.get(1).map(String::as_str) {
            None => Ok(Mode::RunOnce { force: false }),
            Some("--force") => Ok(Mode::RunOnce { force: true }),
            Some(other) => Err(format!("unknown run-once option: {other}")),
        },
        Some(other) => Err(format!(
            "unknown command: {other} (expected `serve` or `run-once [--force]`)"
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mode = parse_mode()?;
    let config_path = std::env::var(CONFIG_ENV_VAR).ok();
    let config = Config::load(config_path.as_deref())?;

    info!(
        node_id = %config.node_id,
        job = %config.job_name,
        storage = %config.storage.url,
        upstream = %config.flow_source.base_url,
        "fdr-reconciler starting"
    );

    let stores = init_storage(&config.storage).await?;
    let source = build_source(&config)?;
    let coordinator = Arc::new(ExecutionCoordinator::new(
        stores.executions.clone(),
        config.node_id.clone(),
        config.job_name.clone(),
        &config.coordinator,
    ));
    let pipeline = Arc::new(Pipeline::new(
        &stores,
        source,
        coordinator,
        config.acquisition.clone(),
    ));

    match mode {
        Mode::RunOnce { force } => run_once(&pipeline, &stores, force).await,
        Mode::Serve => serve(&config, pipeline, &stores).await,
    }
}

fn build_source(config: &Config) -> Result<Arc<dyn FlowSource>, Box<dyn std::error::Error>> {
    let http: Arc<dyn FlowSource> = Arc::new(HttpFlowSource::new(HttpFlowSourceConfig::from(
        &config.flow_source,
    ))?);
    Ok(match build_sink(&config.events)? {
        Some(sink) => Arc::new(InstrumentedFlowSource::new(http, sink)),
        None => http,
    })
}

/// Run a single manual activation and wait for it.
async fn run_once(
    pipeline: &Arc<Pipeline>,
    stores: &Stores,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let trigger = ManualTrigger::new(pipeline.clone(), stores.markers.clone());
    let response = trigger.trigger(force).await;
    let TriggerResponse::Accepted { execution_id } = response else {
        error!(status = response.status_code(), response = ?response, "Run not accepted");
        return Err(format!("run not accepted (HTTP {})", response.status_code()).into());
    };

    let record = loop {
        tokio::time::sleep(RUN_POLL_INTERVAL).await;
        match stores.executions.get(execution_id).await? {
            Some(record) if record.is_open() => continue,
            Some(record) => break record,
            None => return Err(format!("execution {execution_id} disappeared").into()),
        }
    };

    for step in stores.executions.steps(execution_id).await? {
        info!(
            stage = %step.step_name,
            status = %step.status,
            read = step.stats.read,
            written = step.stats.written,
            skipped_in_final = step.stats.skipped_in_final,
            skipped_in_staging = step.stats.skipped_in_staging,
            errors = step.stats.errors,
            "Stage report"
        );
    }

    if record.status != ExecutionStatus::Completed {
        error!(status = %record.status, description = ?record.description, "Run did not complete");
        return Err(format!("run {execution_id} finished {}", record.status).into());
    }
    info!(execution_id = %execution_id, "Run completed");
    Ok(())
}

/// Run scheduler and watcher until shutdown.
async fn serve(
    config: &Config,
    pipeline: Arc<Pipeline>,
    stores: &Stores,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tasks = Vec::new();

    if config.schedule.enabled {
        tasks.push(IntervalScheduler::new(pipeline.clone(), config.schedule.interval()).spawn());
    }
    if config.watcher.enabled {
        let watcher = Arc::new(MarkerWatcher::new(
            stores.markers.clone(),
            pipeline.clone(),
            config.watcher.poll_interval(),
        ));
        tasks.push(watcher.spawn());
    }

    info!(tasks = tasks.len(), "fdr-reconciler serving");

    shutdown_signal().await;

    for task in &tasks {
        task.abort();
    }
    info!("fdr-reconciler stopped");
    Ok(())
}
