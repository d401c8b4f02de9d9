//! Check strategies run against every configured folder of a host.
//!
//! - `noop` lists the folder and records when each matching file was seen.
//! - `attributes` lists the folder with file attributes and records mtime,
//!   atime and size of each matching file.
//! - `put_get_del` runs the `noop` listing, then uploads a check file, reads
//!   it back, compares the content and deletes it. Each step records its
//!   own capability gauge; a failed upload or download skips the steps
//!   after it, leaving their gauges untouched for this cycle.

use crate::matcher::Matcher;
use crate::remote::{remote_join, RemoteError, RemoteFs};
use async_trait::async_trait;
use sftp_exporter_core::{
    Capability, CapabilityState, CheckOutcome, CheckerKind, ExporterMetrics, HostConfig,
};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything a folder check needs besides the session and the folder.
pub struct CycleContext<'a> {
    pub config: &'a HostConfig,
    pub matcher: &'a Matcher,
    pub metrics: &'a ExporterMetrics,
    /// Unix timestamp of the cycle start.
    pub now: i64,
}

#[async_trait]
pub trait CheckStrategy: Send + Sync {
    async fn run(
        &self,
        remote: &dyn RemoteFs,
        folder: &str,
        ctx: &CycleContext<'_>,
    ) -> Result<CheckOutcome, RemoteError>;
}

/// Lists folder entries, skipping `.` and `..`.
pub struct ListOnly;

/// Lists folder entries with their attributes. `.` and `..` are not
/// filtered out, so they are reported whenever the patterns match them.
pub struct Attributes;

/// Write, read back and delete a check file.
pub struct RoundTrip;

/// The strategy implementing a checker kind.
pub fn strategy_for(kind: CheckerKind) -> &'static dyn CheckStrategy {
    match kind {
        CheckerKind::Noop => &ListOnly,
        CheckerKind::Attributes => &Attributes,
        CheckerKind::PutGetDel => &RoundTrip,
    }
}

#[async_trait]
impl CheckStrategy for ListOnly {
    async fn run(
        &self,
        remote: &dyn RemoteFs,
        folder: &str,
        ctx: &CycleContext<'_>,
    ) -> Result<CheckOutcome, RemoteError> {
        let names = remote.list_names(folder).await?;
        let matched: Vec<String> = names
            .into_iter()
            .filter(|name| name != "." && name != "..")
            .filter(|name| ctx.matcher.matches(name))
            .collect();

        for name in &matched {
            ctx.metrics
                .record_seen(folder, name, &ctx.config.host, ctx.now);
        }
        debug!(host = %ctx.config.host, folder = %folder, matched = matched.len(), "Listed folder");
        Ok(CheckOutcome::listed(matched))
    }
}

#[async_trait]
impl CheckStrategy for Attributes {
    async fn run(
        &self,
        remote: &dyn RemoteFs,
        folder: &str,
        ctx: &CycleContext<'_>,
    ) -> Result<CheckOutcome, RemoteError> {
        let entries = remote.list_entries(folder).await?;
        let mut matched = Vec::new();
        for entry in entries.into_iter().filter(|e| ctx.matcher.matches(&e.name)) {
            ctx.metrics
                .record_attributes(folder, &entry.name, &ctx.config.host, &entry.attrs);
            matched.push(entry.name);
        }
        debug!(host = %ctx.config.host, folder = %folder, matched = matched.len(), "Read folder attributes");
        Ok(CheckOutcome::listed(matched))
    }
}

impl RoundTrip {
    fn record(ctx: &CycleContext<'_>, folder: &str, capability: Capability, state: CapabilityState) -> Option<CapabilityState> {
        ctx.metrics.record_capability(
            capability,
            &ctx.config.host,
            &ctx.config.username,
            folder,
            state,
            ctx.now,
        );
        Some(state)
    }

    /// Download the check file into a second staged file and compare it with
    /// the uploaded one.
    async fn read_back(
        remote: &dyn RemoteFs,
        remote_path: &str,
        source: &Path,
    ) -> Result<CapabilityState, RemoteError> {
        let destination = NamedTempFile::new()?;
        remote.download(remote_path, destination.path()).await?;

        let written = tokio::fs::read(source).await?;
        let read = tokio::fs::read(destination.path()).await?;
        if written == read {
            Ok(CapabilityState::Ok)
        } else {
            Ok(CapabilityState::Corrupted)
        }
    }

    /// Remove a check file left behind by an interrupted round trip. Nothing is
    /// recorded: the delete capability was not tested.
    async fn discard_check_file(remote: &dyn RemoteFs, remote_path: &str, host: &str) {
        if let Err(e) = remote.remove(remote_path).await {
            debug!(host = %host, path = %remote_path, error = %e, "Check file cleanup failed");
        }
    }
}

#[async_trait]
impl CheckStrategy for RoundTrip {
    async fn run(
        &self,
        remote: &dyn RemoteFs,
        folder: &str,
        ctx: &CycleContext<'_>,
    ) -> Result<CheckOutcome, RemoteError> {
        let listed = ListOnly.run(remote, folder, ctx).await?;
        let mut outcome = CheckOutcome::listed(listed.matched);

        let host = ctx.config.host.as_str();
        let contents = ctx
            .config
            .check_file_contents
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let remote_path = remote_join(folder, &ctx.config.check_file_name);

        let source = NamedTempFile::new()?;
        tokio::fs::write(source.path(), contents.as_bytes()).await?;

        if let Err(e) = remote.upload(source.path(), &remote_path).await {
            error!(host = %host, folder = %folder, error = %e, "Failed to perform PUT");
            outcome.put = Self::record(ctx, folder, Capability::Put, CapabilityState::Error);
            Self::discard_check_file(remote, &remote_path, host).await;
            return Ok(outcome);
        }
        outcome.put = Self::record(ctx, folder, Capability::Put, CapabilityState::Ok);

        match Self::read_back(remote, &remote_path, source.path()).await {
            Ok(state) => {
                outcome.get = Self::record(ctx, folder, Capability::Get, state);
            }
            Err(e) => {
                error!(host = %host, folder = %folder, error = %e, "Failed to perform GET");
                outcome.get = Self::record(ctx, folder, Capability::Get, CapabilityState::Error);
                Self::discard_check_file(remote, &remote_path, host).await;
                return Ok(outcome);
            }
        }

        match remote.remove(&remote_path).await {
            Ok(()) => {
                outcome.delete = Self::record(ctx, folder, Capability::Delete, CapabilityState::Ok);
                info!(host = %host, folder = %folder, "put_get_del check finished");
            }
            Err(e) => {
                error!(host = %host, folder = %folder, error = %e, "Failed to perform DEL");
                outcome.delete = Self::record(ctx, folder, Capability::Delete, CapabilityState::Error);
            }
        }
        Ok(outcome)
    }
}
