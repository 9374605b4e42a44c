//! Render Farm Worker
//!
//! A lightweight agent that registers with a render farm Manager, fetches
//! one task at a time, executes its commands, and reports status/activity/
//! log updates back through a durable queue. It runs until told to shut
//! down, go to sleep, or wake up.
// This is the main entry point for the worker binary. It is responsible for:
// - Initializing logging and configuration.
// - Resolving the Manager (configured URL or SSDP discovery).
// - Acquiring the subprocess PID file, if configured.
// - Driving the Worker Core through startup and its main loop.
// - Translating OS signals into Core events and handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

mod client;
mod commands;
mod core;
mod discovery;
mod home_config;
mod may_i_run;
mod pidfile;
mod pretask;
mod queue;
mod task_runner;

use crate::client::UpstreamClient;
use crate::core::{CoreEvent, Worker, WorkerState};
use crate::pidfile::PidFile;
use crate::queue::UpdateQueue;
use shared::config::WorkerConfig;
use std::sync::Arc;

/// Command-line arguments for the worker.
#[derive(Parser, Debug)]
#[command(name = "worker", version, about = "Render farm worker agent", long_about = None)]
struct CliArgs {
    /// Path to the worker's TOML config file.
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = "worker.toml")]
    config: PathBuf,

    /// Enable verbose (debug-level) logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Clear the persisted worker id/secret and re-register on startup.
    #[arg(short = 'r', long = "reregister")]
    reregister: bool,

    /// Enable debug logging (an alias for trace-level detail beyond --verbose).
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Override supported task types to a fixed test set.
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Shut down after completing exactly one task.
    #[arg(short = '1', long = "single")]
    single: bool,
}

const EXIT_DISCOVERY_FAILED: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 47;
const EXIT_PRETASK_CHECK_FAILURE: i32 = 44;

const TEST_TASK_TYPES: &[&str] = &["echo", "sleep"];

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli_args.debug || cli_args.verbose { "debug" } else { "info" };
        tracing_subscriber::EnvFilter::new(format!("worker={level},shared={level}"))
    });

    let file_appender = tracing_appender::rolling::daily("./logs", "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    info!("render farm worker starting up");
    info!("config file: {}", cli_args.config.display());

    let mut config = match load_config(&cli_args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("================================================================================");
            error!("FATAL ERROR: failed to load configuration");
            error!("================================================================================");
            error!("Error: {}", e);
            let mut current_error = e.source();
            while let Some(err) = current_error {
                error!("  Caused by: {}", err);
                current_error = err.source();
            }
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if cli_args.test {
        config.task_types = TEST_TASK_TYPES.iter().map(|s| s.to_string()).collect();
    }

    let home_config_path = home_config_path_for(&config);
    if cli_args.reregister {
        if let Err(e) = home_config::clear(&home_config_path) {
            warn!("failed to clear home config for --reregister: {}", e);
        }
    }

    let _pid_file = match &config.subprocess_pid_file {
        Some(path) => match PidFile::acquire(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                error!("failed to acquire PID file {}: {}", path.display(), e);
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        },
        None => None,
    };

    let manager_url = match &config.manager_url {
        Some(url) => url.clone(),
        None => {
            info!("no manager_url configured, starting SSDP discovery");
            match discovery::discover_manager_url().await {
                Some(url) => {
                    info!("discovered manager at {}", url);
                    url
                }
                None => {
                    error!("SSDP discovery found no Manager");
                    std::process::exit(EXIT_DISCOVERY_FAILED);
                }
            }
        }
    };

    let client = UpstreamClient::new(manager_url);

    let queue = match UpdateQueue::open(
        &config.task_update_queue_db,
        config.database_busy_timeout_seconds,
        config.queue_sent_retention_hours,
    ) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("failed to open update queue at {}: {}", config.task_update_queue_db.display(), e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    // An eager check at startup, distinct from the one the Worker Core runs
    // before every fetched task: a misconfigured read/write target here
    // means the worker can never make progress, so fail fast with its own
    // exit code rather than spin forever in the Core's ERROR/retry cycle.
    if let Err(failure) = pretask::run(&config.pre_task_check) {
        error!("pre-task check failed at startup: {}", failure);
        std::process::exit(EXIT_PRETASK_CHECK_FAILURE);
    }

    let mut worker = Worker::new(config, home_config_path, client, queue, cli_args.single);

    if let Err(e) = worker.startup(WorkerState::Awake).await {
        error!("================================================================================");
        error!("FATAL ERROR: worker startup failed");
        error!("================================================================================");
        error!("Error: {}", e);
        let mut current_error = e.source();
        while let Some(err) = current_error {
            error!("  Caused by: {}", err);
            current_error = err.source();
        }
        std::process::exit(1);
    }

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(8);

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
            let mut sigusr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");

            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("received SIGTERM");
                        let _ = events_tx.send(CoreEvent::Shutdown).await;
                        return;
                    }
                    _ = sigint.recv() => {
                        info!("received SIGINT");
                        let _ = events_tx.send(CoreEvent::Shutdown).await;
                        return;
                    }
                    _ = sigusr1.recv() => {
                        info!("received SIGUSR1, going to sleep");
                        let _ = events_tx.send(CoreEvent::GoToSleep).await;
                    }
                    _ = sigusr2.recv() => {
                        info!("received SIGUSR2, waking up");
                        let _ = events_tx.send(CoreEvent::WakeUp).await;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C");
            let _ = events_tx.send(CoreEvent::Shutdown).await;
        }
    };

    tokio::select! {
        result = worker.run(events_rx) => {
            if let Err(e) = result {
                error!("worker error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown_signal => {}
    }

    info!("worker shutdown complete");
    Ok(())
}

fn home_config_path_for(config: &WorkerConfig) -> PathBuf {
    config
        .task_update_queue_db
        .parent()
        .map(|p| p.join("worker_home.toml"))
        .unwrap_or_else(|| PathBuf::from("worker_home.toml"))
}

fn load_config(path: &std::path::Path) -> Result<WorkerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: WorkerConfig =
        toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_config_path_sits_alongside_the_queue_db() {
        let mut config = WorkerConfig::default();
        config.task_update_queue_db = PathBuf::from("/var/lib/worker/queue.db");
        assert_eq!(home_config_path_for(&config), PathBuf::from("/var/lib/worker/worker_home.toml"));
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "not valid = [toml").unwrap();
        assert!(load_config(&path).is_err());
    }
}
