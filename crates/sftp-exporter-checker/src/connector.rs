//! Opening and closing one SSH + SFTP session per check cycle.

use crate::remote::{RemoteEntry, RemoteError, RemoteFs, SftpRemote};
use crate::trust::{policy_for, HostKeyPolicy};
use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use sftp_exporter_core::{Credential, HostConfig, HostState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a session could not be opened. Each variant aborts only the
/// current cycle.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot resolve host name: {0}")]
    Dns(std::io::Error),
    #[error("SSH connection failed: {0}")]
    Connect(#[from] russh::Error),
    #[error("cannot load client key: {0}")]
    Key(#[from] russh_keys::Error),
    #[error("authentication rejected for user {0}")]
    AuthRejected(String),
    #[error("cannot start SFTP subsystem: {0}")]
    Subsystem(String),
}

impl ConnectError {
    /// State recorded on `sftp_host_up` for this failure.
    pub fn state(&self) -> HostState {
        match self {
            ConnectError::Dns(_) => HostState::DnsError,
            ConnectError::Connect(_) | ConnectError::Key(_) | ConnectError::AuthRejected(_) => {
                HostState::ConnectError
            }
            ConnectError::Subsystem(_) => HostState::SftpError,
        }
    }
}

/// An open session, shared by every folder check of one cycle.
pub struct CheckSession<R> {
    pub host: String,
    pub username: String,
    pub remote: R,
}

/// Opens and tears down sessions for a host.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Remote: RemoteFs + 'static;

    async fn open(&self, config: &HostConfig) -> Result<CheckSession<Self::Remote>, ConnectError>;

    /// Must be called once for every session returned by `open`.
    async fn close(&self, session: CheckSession<Self::Remote>);
}

struct ClientHandler {
    host: String,
    port: u16,
    policy: Arc<dyn HostKeyPolicy>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.policy.accept(&self.host, self.port, server_public_key))
    }
}

/// The SFTP session plus the SSH connection carrying it.
pub struct SshSession {
    sftp: SftpRemote,
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl RemoteFs for SshSession {
    async fn list_names(&self, folder: &str) -> Result<Vec<String>, RemoteError> {
        self.sftp.list_names(folder).await
    }

    async fn list_entries(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.sftp.list_entries(folder).await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.sftp.upload(local, remote).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.sftp.download(remote, local).await
    }

    async fn remove(&self, remote: &str) -> Result<(), RemoteError> {
        self.sftp.remove(remote).await
    }
}

/// Connects over SSH using the host's credential and trust policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl SshConnector {
    async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ConnectError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(ConnectError::Dns)?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::Dns(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )));
        }
        Ok(addrs)
    }

    async fn authenticate(
        handle: &mut client::Handle<ClientHandler>,
        config: &HostConfig,
    ) -> Result<(), ConnectError> {
        let accepted = match &config.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(config.username.as_str(), password.as_str())
                    .await?
            }
            Credential::KeyFile(path) => {
                let key = russh_keys::load_secret_key(path, None)?;
                handle
                    .authenticate_publickey(config.username.as_str(), Arc::new(key))
                    .await?
            }
        };
        if accepted {
            Ok(())
        } else {
            Err(ConnectError::AuthRejected(config.username.clone()))
        }
    }

    async fn start_sftp(handle: &client::Handle<ClientHandler>) -> Result<SftpRemote, ConnectError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectError::Subsystem(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ConnectError::Subsystem(e.to_string()))?;
        SftpRemote::start(channel.into_stream())
            .await
            .map_err(|e| ConnectError::Subsystem(e.to_string()))
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Remote = SshSession;

    async fn open(&self, config: &HostConfig) -> Result<CheckSession<SshSession>, ConnectError> {
        let addrs = Self::resolve(&config.host, config.port).await?;

        let handler = ClientHandler {
            host: config.host.clone(),
            port: config.port,
            policy: policy_for(config.validate_known_hosts),
        };
        let ssh_config = Arc::new(client::Config::default());
        let mut handle = client::connect(ssh_config, &addrs[..], handler).await?;

        if let Err(e) = Self::authenticate(&mut handle, config).await {
            disconnect(&handle, &config.host).await;
            return Err(e);
        }

        let sftp = match Self::start_sftp(&handle).await {
            Ok(sftp) => sftp,
            Err(e) => {
                disconnect(&handle, &config.host).await;
                return Err(e);
            }
        };

        debug!(host = %config.host, username = %config.username, "SFTP session opened");
        Ok(CheckSession {
            host: config.host.clone(),
            username: config.username.clone(),
            remote: SshSession { sftp, handle },
        })
    }

    async fn close(&self, session: CheckSession<SshSession>) {
        if let Err(e) = session.remote.sftp.close() {
            debug!(host = %session.host, error = %e, "SFTP session close failed");
        }
        disconnect(&session.remote.handle, &session.host).await;
    }
}

async fn disconnect(handle: &client::Handle<ClientHandler>, host: &str) {
    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        warn!(host = %host, error = %e, "SSH disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_states() {
        let dns = ConnectError::Dns(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"));
        assert_eq!(dns.state(), HostState::DnsError);
        assert_eq!(
            ConnectError::AuthRejected("sftp".into()).state(),
            HostState::ConnectError
        );
        assert_eq!(
            ConnectError::Subsystem("refused".into()).state(),
            HostState::SftpError
        );
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_dns_error() {
        let err = SshConnector::resolve("host.invalid", 22).await.unwrap_err();
        assert_eq!(err.state(), HostState::DnsError);
    }
}
