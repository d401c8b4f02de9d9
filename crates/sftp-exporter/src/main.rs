//! SFTP Exporter - Prometheus exporter probing SFTP servers.
//!
//! Loads the host checks from a YAML config file, runs them periodically and
//! serves the results on `/metrics`.

use anyhow::Context;
use clap::Parser;
use sftp_exporter_core::config::{expand_home, load_config};
use sftp_exporter_core::{tracing_setup, ExporterMetrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sftp-exporter")]
#[command(version)]
#[command(about = "Prometheus exporter for SFTP servers", long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(default_value = "config.yml")]
    config_file: String,

    /// Host name or address to serve metrics on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to serve metrics on
    #[arg(short = 'P', long, default_value_t = 9339)]
    port: u16,

    /// Drop invalid check entries instead of exiting
    #[arg(long)]
    skip_wrong_config: bool,
}

/// Resolve the listen host, taking the first address it maps to.
async fn bind_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve listen host {host}"))?
        .next()
        .with_context(|| format!("listen host {host} has no addresses"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_setup::init();

    let cli = Cli::parse();

    let path = expand_home(&cli.config_file);
    let doc = match load_config(&path).await {
        Ok(doc) => doc,
        Err(e) => {
            error!("Failed to load config {}: {}", path.display(), e);
            std::process::exit(e.exit_code());
        }
    };

    let configs = match doc.validated(cli.skip_wrong_config) {
        Ok(configs) => configs,
        Err(e) => {
            error!("Invalid config {}: {}", path.display(), e);
            std::process::exit(e.exit_code());
        }
    };
    if configs.is_empty() {
        warn!("No valid checks configured, serving empty metrics");
    }

    let metrics = Arc::new(ExporterMetrics::new().context("failed to register metrics")?);
    let addr = bind_addr(&cli.host, cli.port).await?;
    let run_checks = !configs.is_empty();

    info!("Starting SFTP exporter with {} check(s)", configs.len());

    tokio::select! {
        result = sftp_exporter_web::serve(addr, metrics.clone()) => {
            match result {
                Ok(()) => info!("Metrics server completed"),
                Err(e) => {
                    error!("Metrics server error: {:#}", e);
                    return Err(e);
                }
            }
        }
        _ = sftp_exporter_checker::run(configs, metrics.clone()), if run_checks => {
            info!("Checkers completed");
        }
    }

    Ok(())
}
