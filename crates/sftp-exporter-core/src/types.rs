//! Common types used across the exporter crates.

use std::fmt;

/// State label recorded on `sftp_host_up` after a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    Ok,
    DnsError,
    ConnectError,
    SftpError,
}

impl HostState {
    /// The label value exported for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Ok => "Ok",
            HostState::DnsError => "DNSError",
            HostState::ConnectError => "ConnectError",
            HostState::SftpError => "SFTPError",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three folder capabilities exercised by the round-trip check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Put,
    Get,
    Delete,
}

impl Capability {
    /// Name of the gauge this capability is recorded on.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Capability::Put => "sftp_put_file_up",
            Capability::Get => "sftp_get_file_up",
            Capability::Delete => "sftp_del_file_up",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Put => "put",
            Capability::Get => "get",
            Capability::Delete => "del",
        };
        f.write_str(name)
    }
}

/// Outcome of one capability step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityState {
    Ok,
    Error,
    /// Read back succeeded but the content differs from what was written.
    Corrupted,
}

impl CapabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityState::Ok => "Ok",
            CapabilityState::Error => "Error",
            CapabilityState::Corrupted => "Corrupted",
        }
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes reported by the remote side for a directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub mtime: Option<u64>,
    pub atime: Option<u64>,
    pub size: Option<u64>,
}

/// What a single folder check produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub matched: Vec<String>,
    pub put: Option<CapabilityState>,
    pub get: Option<CapabilityState>,
    pub delete: Option<CapabilityState>,
}

impl CheckOutcome {
    pub fn listed(matched: Vec<String>) -> Self {
        Self {
            matched,
            ..Self::default()
        }
    }
}
