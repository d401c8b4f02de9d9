//! SFTP Exporter Checker - periodic SFTP checks feeding the exporter metrics.
//!
//! Every configured host gets its own [`scheduler::HostScheduler`], which opens
//! a fresh session per cycle and runs the host's check strategy against each
//! of its folders.

use futures::future::join_all;
use sftp_exporter_core::{ExporterMetrics, HostConfig};
use std::sync::Arc;
use tracing::{error, info};

pub mod connector;
pub mod matcher;
pub mod remote;
pub mod scheduler;
pub mod strategy;
pub mod trust;

#[cfg(test)]
mod testing;

use connector::SshConnector;
use scheduler::HostScheduler;

/// Start one scheduler per host and run them until the process exits.
pub async fn run(configs: Vec<HostConfig>, metrics: Arc<ExporterMetrics>) {
    info!("Starting checks for {} host(s)", configs.len());

    let connector = Arc::new(SshConnector);
    let handles: Vec<_> = configs
        .into_iter()
        .map(|config| {
            let scheduler = Arc::new(HostScheduler::new(config, connector.clone(), metrics.clone()));
            tokio::spawn(scheduler.run())
        })
        .collect();

    for result in join_all(handles).await {
        if let Err(e) = result {
            error!("Scheduler task error: {}", e);
        }
    }
}
