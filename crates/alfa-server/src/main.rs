//! Main entry point for the `alfa-lock` command line tool.
//!
//! Loads configuration, sets up logging and metrics, connects the lock
//! backends and dispatches to the selected command.

use std::sync::Arc;

use alfa_common::AppError;
use alfa_common::error::{ExitCode, SUCCESS};
use alfa_lock::{DistributedMutex, MetricsListener};
use alfa_server::{
    command,
    config::{AppConfig, Cli, Command},
    startup,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code().code);
        }
    };

    let logging_guard = match startup::init_logging(&app_config.logging_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(alfa_common::error::INTERNAL.code);
        }
    };

    let exit_code = match run(cli, app_config).await {
        Ok(code) => code,
        Err(e) => {
            let e = AppError::from(e);
            error!(error = %e, "Command failed");
            eprintln!("{}", e);
            e.exit_code()
        }
    };

    // Flush file logs before exiting
    drop(logging_guard);
    std::process::exit(exit_code.code);
}

async fn run(cli: Cli, app_config: AppConfig) -> anyhow::Result<ExitCode> {
    if let Some(addr) = app_config.metrics_addr()? {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        alfa_lock::metrics::describe_metrics();
        info!(addr = %addr, "Prometheus metrics endpoint started");
    }

    let stores = app_config.build_stores()?;
    info!(backends = stores.len(), "Lock backends configured");
    let mutex = DistributedMutex::new(stores, app_config.lock.clone())
        .map_err(|e| alfa_common::AlfaError::ConfigError(e.to_string()))?;
    let _metrics_listener = mutex.register_listener(Arc::new(MetricsListener));

    let shutdown = startup::wait_for_shutdown_signal().await;

    let code = match &cli.command {
        Command::Check => command::check(&mutex).await,
        Command::Hold(args) => command::hold(&mutex, args, &shutdown).await?,
        Command::Run(args) => command::run(&mutex, args, &shutdown).await?,
    };

    if code == SUCCESS {
        info!("Done");
    }
    Ok(code)
}
