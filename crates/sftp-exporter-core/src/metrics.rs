//! Prometheus gauges published by the exporter.
//!
//! Every gauge holds the latest observation per label tuple. A label tuple
//! that was not written in a cycle keeps its previous value; consumers
//! detect staleness from the timestamp value, not from zeros.

use crate::types::{Capability, CapabilityState, FileAttributes, HostState};
use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

const FILE_LABELS: &[&str] = &["folder", "file", "host"];
const HOST_LABELS: &[&str] = &["host", "username", "state"];
const FOLDER_LABELS: &[&str] = &["host", "username", "folder", "state"];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// The registry every check writes into. Shared behind an `Arc`.
pub struct ExporterMetrics {
    registry: Registry,
    last_seen: GaugeVec,
    host_up: GaugeVec,
    put_file_up: GaugeVec,
    get_file_up: GaugeVec,
    del_file_up: GaugeVec,
    modified: GaugeVec,
    accessed: GaugeVec,
    size: GaugeVec,
    cycles_running: IntGaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec, MetricsError> {
    let vec = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let last_seen = gauge(
            &registry,
            "sftp_last_seen_timestamp",
            "Last timestamp when a file has been seen over SFTP.",
            FILE_LABELS,
        )?;
        let host_up = gauge(&registry, "sftp_host_up", "Signalizes SFTP host being UP", HOST_LABELS)?;
        let put_file_up = gauge(
            &registry,
            Capability::Put.metric_name(),
            "Signalizes SFTP folder write-able",
            FOLDER_LABELS,
        )?;
        let get_file_up = gauge(
            &registry,
            Capability::Get.metric_name(),
            "Signalizes SFTP folder read-able",
            FOLDER_LABELS,
        )?;
        let del_file_up = gauge(
            &registry,
            Capability::Delete.metric_name(),
            "Signalizes SFTP folder delete-able",
            FOLDER_LABELS,
        )?;
        let modified = gauge(
            &registry,
            "sftp_file_modified_timestamp",
            "SFTP mtime attribute of a file",
            FILE_LABELS,
        )?;
        let accessed = gauge(
            &registry,
            "sftp_file_access_timestamp",
            "SFTP atime attribute of a file",
            FILE_LABELS,
        )?;
        let size = gauge(&registry, "sftp_file_size", "SFTP size attribute of a file", FILE_LABELS)?;

        let cycles_running = IntGaugeVec::new(
            Opts::new(
                "sftp_check_cycles_running",
                "Number of check cycles currently in flight for a host",
            ),
            &["host"],
        )?;
        registry.register(Box::new(cycles_running.clone()))?;

        Ok(Self {
            registry,
            last_seen,
            host_up,
            put_file_up,
            get_file_up,
            del_file_up,
            modified,
            accessed,
            size,
            cycles_running,
        })
    }

    pub fn record_seen(&self, folder: &str, file: &str, host: &str, now: i64) {
        self.last_seen
            .with_label_values(&[folder, file, host])
            .set(now as f64);
    }

    pub fn record_host(&self, host: &str, username: &str, state: HostState, now: i64) {
        self.host_up
            .with_label_values(&[host, username, state.as_str()])
            .set(now as f64);
    }

    pub fn record_capability(
        &self,
        capability: Capability,
        host: &str,
        username: &str,
        folder: &str,
        state: CapabilityState,
        now: i64,
    ) {
        let vec = match capability {
            Capability::Put => &self.put_file_up,
            Capability::Get => &self.get_file_up,
            Capability::Delete => &self.del_file_up,
        };
        vec.with_label_values(&[host, username, folder, state.as_str()])
            .set(now as f64);
    }

    /// Missing attributes are recorded as zero.
    pub fn record_attributes(&self, folder: &str, file: &str, host: &str, attrs: &FileAttributes) {
        let labels = [folder, file, host];
        self.modified
            .with_label_values(&labels)
            .set(attrs.mtime.unwrap_or_default() as f64);
        self.accessed
            .with_label_values(&labels)
            .set(attrs.atime.unwrap_or_default() as f64);
        self.size
            .with_label_values(&labels)
            .set(attrs.size.unwrap_or_default() as f64);
    }

    pub fn cycle_started(&self, host: &str) {
        self.cycles_running.with_label_values(&[host]).inc();
    }

    pub fn cycle_finished(&self, host: &str) {
        self.cycles_running.with_label_values(&[host]).dec();
    }

    /// Look up the current value of one exact label tuple without creating it.
    pub fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == labels.len()
                    && labels.iter().all(|(k, v)| {
                        pairs
                            .iter()
                            .any(|pair| pair.get_name() == *k && pair.get_value() == *v)
                    })
            })
            .map(|metric| {
                if metric.has_gauge() {
                    metric.get_gauge().get_value()
                } else {
                    0.0
                }
            })
    }

    /// Number of label tuples currently held by a gauge.
    pub fn series_count(&self, name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
