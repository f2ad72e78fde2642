// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! VistterStream — on-premises streaming appliance control plane.
//!
//! Usage:
//!   vistterstream run    --config config.toml
//!   vistterstream status --config config.toml

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vistterstream_core::api;
use vistterstream_core::app::Application;
use vistterstream_core::config::AppConfig;

#[derive(Parser)]
#[command(name = "vistterstream", about = "VistterStream streaming control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the control plane: boot camera relays, probe the hardware
    /// encoder profile, and serve the internal HTTP API until Ctrl+C.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief configuration/health summary and exit (exit code 3
    /// if a required dependency looks unreachable at a glance).
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

// Exit codes (§6): 0 success, 2 configuration error, 3 unhealthy
// dependency at startup, 4 fatal runtime.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_UNHEALTHY_DEPENDENCY: u8 = 3;
const EXIT_FATAL_RUNTIME: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Status { config } => status(config).await,
    }
}

async fn run(config_path: PathBuf) -> ExitCode {
    let mut cfg = match AppConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let env = vistterstream_core::config::EnvOverrides::from_env();
    env.apply(&mut cfg);

    info!(
        cameras = cfg.cameras.len(),
        destinations = cfg.destinations.len(),
        api_port = cfg.api.port,
        "starting VistterStream"
    );

    let app = match Application::start(cfg.clone()).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to start application");
            return ExitCode::from(EXIT_UNHEALTHY_DEPENDENCY);
        }
    };

    let api_enabled = cfg.api.enabled;
    let api_port = cfg.api.port;
    let state = std::sync::Arc::new(api::AppState { app });

    let server_handle = if api_enabled {
        let state = state.clone();
        Some(tokio::spawn(async move {
            api::start_server(state, api_port).await;
        }))
    } else {
        None
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "signal handler error");
            return ExitCode::from(EXIT_FATAL_RUNTIME);
        }
    }

    state.app.shutdown().await;
    if let Some(handle) = server_handle {
        handle.abort();
    }

    ExitCode::SUCCESS
}

async fn status(config_path: PathBuf) -> ExitCode {
    let cfg = match AppConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    println!("=== VistterStream Status ===");
    println!("Cameras      : {}", cfg.cameras.len());
    for cam in &cfg.cameras {
        println!("  {} ({}): {}", cam.id, cam.name, cam.stream_url);
    }
    println!("Destinations : {}", cfg.destinations.len());
    for dest in &cfg.destinations {
        println!("  {} ({})", dest.id, dest.name);
    }
    println!("API          : {} (port {})", if cfg.api.enabled { "enabled" } else { "disabled" }, cfg.api.port);
    println!("Relay        : {}:{}", cfg.relay.host, cfg.relay.port);

    if cfg.cameras.is_empty() {
        warn!("no cameras configured");
        return ExitCode::from(EXIT_UNHEALTHY_DEPENDENCY);
    }

    ExitCode::SUCCESS
}
