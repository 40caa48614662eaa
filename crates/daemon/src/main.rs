// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! idaproxyd: multiplexing proxy in front of idalib-mcp analysis workers.

use std::path::PathBuf;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use idaproxy_core::{ConfigFile, ProxyConfig};

/// Multiplexing proxy for idalib-mcp analysis workers
#[derive(Debug, Parser)]
#[command(name = "idaproxyd", version)]
struct Args {
    /// Host to listen on (default: 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (default: 8744)
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of concurrent worker processes (default: 2)
    #[arg(long)]
    max_processes: Option<usize>,

    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ProxyConfig::default();
    if let Some(path) = &args.config {
        // A broken config file falls back to defaults; CLI flags still apply
        match ConfigFile::load(path) {
            Ok(file) => config.apply_file(&file),
            Err(e) => warn!(error = %e, "ignoring config file"),
        }
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_processes) = args.max_processes {
        config.max_processes = max_processes;
    }

    idaproxy_daemon::run(config).await?;
    Ok(())
}
