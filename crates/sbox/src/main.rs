//! `sbox` binary: runs the relay until Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sbox::prelude::*;
use tokio::signal;
use tracing::{error, info};

/// SBOX - bot gateway relay between a local bot, the coordination server
/// and game engines
#[derive(Parser)]
#[command(name = "sbox", version, about)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", help = "Path to configuration file (TOML format)")]
    config: Option<PathBuf>,

    /// Bot gateway port override
    #[arg(long, value_name = "PORT", help = "Override the port the bot connects to")]
    bot_port: Option<u16>,

    /// Server host override
    #[arg(long, value_name = "HOST", help = "Override the coordination server host")]
    server_host: Option<String>,

    /// Server port override
    #[arg(long, value_name = "PORT", help = "Override the coordination server port")]
    server_port: Option<u16>,

    /// Log level used when RUST_LOG is unset
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        default_value = "info",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: String,
}

fn init_logging(log_level: &str) -> Result<(), String> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {e}"))
}

/// Reads the config file (if any) and applies CLI overrides.
fn load_config(args: &Args) -> Result<RelayConfig, SboxError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RelayConfig::from_file(path)?
        }
        None => RelayConfig::default(),
    };

    if let Some(port) = args.bot_port {
        config.bot_port = port;
    }
    if let Some(host) = &args.server_host {
        config.server_host = host.clone();
    }
    if let Some(port) = args.server_port {
        config.server_port = port;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Activity log entries are emitted as tracing events by the state store.
    let runtime = SboxRuntime::new(config);

    if let Err(e) = runtime.start().await {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    if let Some(addr) = runtime.gateway_addr() {
        info!("Waiting for bot on ws://{addr}");
    }

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
    }
    info!("Shutting down");
    runtime.stop().await;

    ExitCode::SUCCESS
}
