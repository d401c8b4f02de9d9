//! SFTP exporter core - shared configuration, metric and type definitions.

pub mod config;
pub mod dates;
pub mod metrics;
pub mod tracing_setup;
pub mod types;

pub use config::{
    CheckerKind, ConfigDocument, ConfigError, Credential, HostConfig, InvalidEntry, LoadError,
};
pub use metrics::ExporterMetrics;
pub use types::{Capability, CapabilityState, CheckOutcome, FileAttributes, HostState};
