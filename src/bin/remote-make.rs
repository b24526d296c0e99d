//! # remote-make
//!
//! ```bash
//! # Run a task and print the realized task as JSON
//! remote-make master --template build.json
//!
//! # Serve step requests (what provisioned docker workers run)
//! BUS_URL=10.0.0.5:4222 REMOTE_MAKE__BUS__TRANSPORT=tcp remote-make worker
//!
//! # Check configuration and templates without running anything
//! remote-make validate-config --config config/remote-make.toml
//! remote-make validate-template --template build.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use remote_make::config::{ConfigLoader, RemoteMakeConfig};
use remote_make::logging;
use remote_make::models::TaskTemplate;
use remote_make::NodeRuntime;

#[derive(Parser)]
#[command(name = "remote-make")]
#[command(about = "Run tasks on ephemeral workers, one ordered step at a time")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/remote-make.toml when present)
    #[arg(short, long, global = true, env = "REMOTE_MAKE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task template to completion
    Master {
        /// Task template as JSON
        #[arg(short, long)]
        template: PathBuf,

        /// Overrides timeouts.task_seconds
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },

    /// Serve bus requests until interrupted
    Worker,

    /// Print the effective configuration
    ValidateConfig,

    /// Check a task template without running it
    ValidateTemplate {
        #[arg(short, long)]
        template: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("remote-make: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::ValidateTemplate { template } => {
            let template = read_template(&template)?;
            template.validate().context("template is invalid")?;
            println!(
                "Template {} is valid ({} steps)",
                template.display_name(),
                template.steps.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::ValidateConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Master {
            template,
            timeout_seconds,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(seconds) = timeout_seconds {
                config.timeouts.task_seconds = seconds;
            }
            logging::init_tracing_with(config.logging.format, config.logging.level.as_deref());
            let template = read_template(&template)?;
            run_master(config, template).await
        }
        Commands::Worker => {
            let config = load_config(cli.config.as_deref())?;
            logging::init_tracing_with(config.logging.format, config.logging.level.as_deref());
            run_worker(config).await
        }
    }
}

async fn run_master(config: RemoteMakeConfig, template: TaskTemplate) -> Result<ExitCode> {
    let node = NodeRuntime::bootstrap(config)
        .await
        .context("failed to start node")?;
    info!(
        node_id = %node.identity().id,
        template = %template.display_name(),
        "Running task"
    );

    let result = node.run_task(&template).await?;
    let (task, code) = match result {
        Ok(task) => (task, ExitCode::SUCCESS),
        Err(failure) => {
            error!(kind = %failure.kind(), error = %failure.error, "Task failed");
            (failure.entity, ExitCode::FAILURE)
        }
    };
    println!("{}", serde_json::to_string_pretty(&task)?);

    node.shutdown().await;
    Ok(code)
}

async fn run_worker(config: RemoteMakeConfig) -> Result<ExitCode> {
    let node = NodeRuntime::bootstrap(config)
        .await
        .context("failed to start node")?;
    info!(
        node_id = %node.identity().id,
        version = env!("CARGO_PKG_VERSION"),
        "Worker node ready, press Ctrl+C to stop"
    );

    shutdown_signal().await;
    info!("Shutdown signal received");
    node.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> Result<RemoteMakeConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new().with_file(path),
        None => ConfigLoader::new(),
    };
    loader.load().context("failed to load configuration")
}

fn read_template(path: &Path) -> Result<TaskTemplate> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
