//! Host key acceptance policies.

use russh_keys::key::PublicKey;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Decides whether the identity presented by a server is trusted.
pub trait HostKeyPolicy: Send + Sync {
    fn accept(&self, host: &str, port: u16, key: &PublicKey) -> bool;
}

/// Accepts every host key.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassAll;

impl HostKeyPolicy for BypassAll {
    fn accept(&self, _host: &str, _port: u16, _key: &PublicKey) -> bool {
        true
    }
}

/// Accepts only keys recorded in a known_hosts file, `~/.ssh/known_hosts`
/// unless another path is given. Unknown hosts and changed keys are
/// rejected.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    path: Option<PathBuf>,
}

impl KnownHosts {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl HostKeyPolicy for KnownHosts {
    fn accept(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        let checked = match &self.path {
            Some(path) => russh_keys::check_known_hosts_path(host, port, key, path),
            None => russh_keys::check_known_hosts(host, port, key),
        };
        match checked {
            Ok(true) => true,
            Ok(false) => {
                warn!(host = %host, port, "Host key is not in known_hosts");
                false
            }
            Err(e) => {
                warn!(host = %host, port, error = %e, "Host key validation failed");
                false
            }
        }
    }
}

/// Policy for a host depending on its `validate_known_hosts` flag.
pub fn policy_for(validate_known_hosts: bool) -> Arc<dyn HostKeyPolicy> {
    if validate_known_hosts {
        Arc::new(KnownHosts::default())
    } else {
        Arc::new(BypassAll)
    }
}
