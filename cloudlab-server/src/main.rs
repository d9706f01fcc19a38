use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod config;
mod store;

use cli::{Args, Mode};
use config::Config;

/// Initialize tracing:
/// 1. Console output (stderr), so command output on stdout stays clean
/// 2. Optional file output (`<log_dir>/cloudlab.log`)
///
/// The returned guard must stay alive for the file writer to flush.
fn initialize_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,cloudlab_orchestrations=debug,cloudlab_server=debug".into());

    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, "cloudlab.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(file_writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file and environment
    let config = Config::load()?;

    // Parse command line arguments
    let args = Args::parse();

    let _log_guard = initialize_tracing(config.log_dir.as_deref())?;

    match &args.mode {
        Mode::Get { compute_id } => commands::cluster::run_get(&config, compute_id, &args.output).await,
        Mode::List => commands::instance::run_list(&config, &args.output).await,
        Mode::Nodes => commands::cluster::run_nodes(&config, &args.output).await,
        mode => match mode.lifecycle() {
            Some((command_type, id)) => {
                commands::instance::run_lifecycle(&config, command_type, id, &args.output).await
            }
            None => anyhow::bail!("Unsupported command: {:?}", mode),
        },
    }
}
