//! Periodic check cycles for one host.

use crate::connector::Connector;
use crate::matcher::{resolve_folders, MatchError, Matcher};
use crate::remote::RemoteFs;
use crate::strategy::{strategy_for, CycleContext};
use chrono::{DateTime, Local};
use futures::future::{join_all, FutureExt};
use sftp_exporter_core::{ExporterMetrics, HostConfig, HostState};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs a check cycle for one host every `interval`.
///
/// Cycles are started on a fixed cadence and are not awaited by the loop,
/// so a slow cycle may still be running when the next one begins unless
/// `skip_overlapping_cycles` is set.
pub struct HostScheduler<C: Connector> {
    config: Arc<HostConfig>,
    connector: Arc<C>,
    metrics: Arc<ExporterMetrics>,
    in_flight: Arc<AtomicUsize>,
}

/// Tracks one running cycle. Dropping it, including on panic, marks the
/// cycle finished.
struct CycleGuard {
    in_flight: Arc<AtomicUsize>,
    metrics: Arc<ExporterMetrics>,
    host: String,
}

impl CycleGuard {
    fn enter(in_flight: Arc<AtomicUsize>, metrics: Arc<ExporterMetrics>, host: &str) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        metrics.cycle_started(host);
        Self {
            in_flight,
            metrics,
            host: host.to_string(),
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.metrics.cycle_finished(&self.host);
    }
}

impl<C: Connector> HostScheduler<C> {
    pub fn new(config: HostConfig, connector: Arc<C>, metrics: Arc<ExporterMetrics>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            metrics,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Loop forever, starting a cycle now and then once per interval.
    pub async fn run(self: Arc<Self>) {
        info!(
            host = %self.config.host,
            checker = %self.config.checker.as_str(),
            interval_secs = self.config.interval.as_secs(),
            "Starting host scheduler"
        );

        loop {
            let running = self.in_flight.load(Ordering::SeqCst);
            if running > 0 && self.config.skip_overlapping_cycles {
                warn!(host = %self.config.host, running, "Previous cycle still running, skipping this one");
            } else {
                if running > 0 {
                    warn!(host = %self.config.host, running, "Previous cycle still running, starting another");
                }
                let guard = CycleGuard::enter(
                    self.in_flight.clone(),
                    self.metrics.clone(),
                    &self.config.host,
                );
                let scheduler = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    scheduler.run_cycle().await;
                });
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// One cycle: open a session, check every folder, close the session.
    pub async fn run_cycle(&self) {
        let started = Local::now();
        let now = started.timestamp();
        let config = &*self.config;

        let session = match self.connector.open(config).await {
            Ok(session) => session,
            Err(e) => {
                error!(host = %config.host, error = %e, "Failed to open SFTP session");
                self.metrics
                    .record_host(&config.host, &config.username, e.state(), now);
                return;
            }
        };
        self.metrics
            .record_host(&config.host, &config.username, HostState::Ok, now);

        match prepare(config, started) {
            Ok((matcher, folders)) => {
                self.check_folders(&session.remote, &matcher, &folders, now)
                    .await
            }
            Err(e) => error!(host = %config.host, error = %e, "Failed to render folders or patterns"),
        }

        self.connector.close(session).await;
        debug!(host = %config.host, "Cycle finished");
    }

    async fn check_folders(&self, remote: &C::Remote, matcher: &Matcher, folders: &[String], now: i64) {
        let config = &*self.config;
        let strategy = strategy_for(config.checker);
        let ctx = &CycleContext {
            config,
            matcher,
            metrics: &self.metrics,
            now,
        };
        let remote: &dyn RemoteFs = remote;
        let checks = folders.iter().map(|folder| async move {
            let result = AssertUnwindSafe(strategy.run(remote, folder, ctx))
                .catch_unwind()
                .await;
            (folder, result)
        });

        for (folder, result) in join_all(checks).await {
            match result {
                Ok(Ok(outcome)) => {
                    debug!(host = %config.host, folder = %folder, matched = outcome.matched.len(), "Folder checked")
                }
                Ok(Err(e)) => {
                    error!(host = %config.host, folder = %folder, error = %e, "Folder check failed")
                }
                Err(_) => error!(host = %config.host, folder = %folder, "Folder check panicked"),
            }
        }
    }
}

fn prepare(config: &HostConfig, now: DateTime<Local>) -> Result<(Matcher, Vec<String>), MatchError> {
    let matcher = Matcher::compile(&config.patterns, now)?;
    let folders = resolve_folders(&config.folders, now)?;
    Ok((matcher, folders))
}
