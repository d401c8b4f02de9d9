//! In-memory remotes, connector and SFTP server used by the unit tests.

use crate::connector::{ConnectError, Connector, CheckSession};
use crate::remote::{RemoteEntry, RemoteError, RemoteFs, SftpRemote};
use async_trait::async_trait;
use russh_sftp::protocol::{
    Data, File, FileAttributes as SftpAttributes, Handle, Name, OpenFlags, Status, StatusCode,
};
use sftp_exporter_core::{FileAttributes, HostConfig};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct State {
    listings: HashMap<String, Vec<RemoteEntry>>,
    files: HashMap<String, Vec<u8>>,
    calls: Vec<String>,
    fail_upload: bool,
    fail_download: bool,
    fail_remove: bool,
    corrupt_download: bool,
    list_delay: Option<Duration>,
}

/// A fake remote with scripted listings and failure switches.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
}

fn denied(op: &str) -> RemoteError {
    RemoteError::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("{op} denied"),
    ))
}

impl FakeRemote {
    pub fn with_files(folder: &str, names: &[&str]) -> Self {
        let remote = Self::default();
        let entries = names
            .iter()
            .map(|name| RemoteEntry {
                name: name.to_string(),
                attrs: FileAttributes::default(),
            })
            .collect();
        remote.set_listing(folder, entries);
        remote
    }

    pub fn set_listing(&self, folder: &str, entries: Vec<RemoteEntry>) {
        self.lock().listings.insert(folder.to_string(), entries);
    }

    pub fn fail_upload(&self) {
        self.lock().fail_upload = true;
    }

    pub fn fail_download(&self) {
        self.lock().fail_download = true;
    }

    pub fn fail_remove(&self) {
        self.lock().fail_remove = true;
    }

    pub fn corrupt_download(&self) {
        self.lock().corrupt_download = true;
    }

    pub fn delay_listings(&self, delay: Duration) {
        self.lock().list_delay = Some(delay);
    }

    /// Operations performed so far, e.g. `"upload www/.health-check"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn listing(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.lock()
            .listings
            .get(folder)
            .cloned()
            .ok_or_else(|| RemoteError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such folder")))
    }

    async fn maybe_delay(&self) {
        let delay = self.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteFs for FakeRemote {
    async fn list_names(&self, folder: &str) -> Result<Vec<String>, RemoteError> {
        self.lock().calls.push(format!("list_names {folder}"));
        self.maybe_delay().await;
        Ok(self.listing(folder)?.into_iter().map(|e| e.name).collect())
    }

    async fn list_entries(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.lock().calls.push(format!("list_entries {folder}"));
        self.maybe_delay().await;
        self.listing(folder)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.lock().calls.push(format!("upload {remote}"));
        if self.lock().fail_upload {
            return Err(denied("upload"));
        }
        let data = tokio::fs::read(local).await?;
        self.lock().files.insert(remote.to_string(), data);
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let mut data = {
            let mut state = self.lock();
            state.calls.push(format!("download {remote}"));
            if state.fail_download {
                return Err(denied("download"));
            }
            state
                .files
                .get(remote)
                .cloned()
                .ok_or_else(|| RemoteError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")))?
        };
        if self.lock().corrupt_download {
            data.push(b'!');
        }
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn remove(&self, remote: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(format!("remove {remote}"));
        if state.fail_remove {
            return Err(denied("remove"));
        }
        state.files.remove(remote);
        Ok(())
    }
}

/// What the fake connector does on `open`.
#[derive(Clone, Copy)]
pub enum OpenBehavior {
    Succeed,
    DnsFailure,
    SubsystemFailure,
}

/// A connector handing out one shared [`FakeRemote`].
pub struct FakeConnector {
    pub remote: FakeRemote,
    behavior: OpenBehavior,
    opened_at: Mutex<Vec<Instant>>,
    closed: Mutex<usize>,
}

impl FakeConnector {
    pub fn new(remote: FakeRemote, behavior: OpenBehavior) -> Self {
        Self {
            remote,
            behavior,
            opened_at: Mutex::new(Vec::new()),
            closed: Mutex::new(0),
        }
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.opened_at.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Remote = FakeRemote;

    async fn open(&self, config: &HostConfig) -> Result<CheckSession<FakeRemote>, ConnectError> {
        self.opened_at.lock().unwrap().push(Instant::now());
        match self.behavior {
            OpenBehavior::Succeed => Ok(CheckSession {
                host: config.host.clone(),
                username: config.username.clone(),
                remote: self.remote.clone(),
            }),
            OpenBehavior::DnsFailure => Err(ConnectError::Dns(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "failed to lookup address information",
            ))),
            OpenBehavior::SubsystemFailure => {
                Err(ConnectError::Subsystem("subsystem request failed".into()))
            }
        }
    }

    async fn close(&self, _session: CheckSession<FakeRemote>) {
        *self.closed.lock().unwrap() += 1;
    }
}

/// A minimal valid host config for tests.
pub fn host_config(yaml: &str) -> HostConfig {
    let base = format!("host: sftp.example.com\npassword: secret\n{yaml}");
    HostConfig::from_value(serde_yaml::from_str(&base).unwrap()).unwrap()
}

#[derive(Default)]
struct ServerState {
    folders: HashMap<String, Vec<File>>,
    files: HashMap<String, Vec<u8>>,
    exhausted: HashSet<String>,
}

/// An SFTP server answering from memory, reached over an in-process pipe.
///
/// Directory listings are sent exactly as scripted, in a single batch.
#[derive(Clone, Default)]
pub struct MemorySftpServer {
    state: Arc<Mutex<ServerState>>,
}

fn status_ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl MemorySftpServer {
    pub fn with_folder(folder: &str, entries: Vec<File>) -> Self {
        let server = Self::default();
        server.lock().folders.insert(folder.to_string(), entries);
        server
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Serve this state on one end of a duplex pipe and hand back a client
    /// session on the other.
    pub async fn connect(&self) -> SftpRemote {
        let (client, server) = tokio::io::duplex(256 * 1024);
        russh_sftp::server::run(server, self.clone()).await;
        SftpRemote::start(client).await.unwrap()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }
}

impl russh_sftp::server::Handler for MemorySftpServer {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: SftpAttributes,
    ) -> Result<Handle, Self::Error> {
        let mut state = self.lock();
        if pflags.contains(OpenFlags::TRUNCATE) {
            state.files.insert(filename.clone(), Vec::new());
        } else if !state.files.contains_key(&filename) {
            return Err(StatusCode::NoSuchFile);
        }
        Ok(Handle { id, handle: filename })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.lock().exhausted.remove(&handle);
        Ok(status_ok(id))
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data, Self::Error> {
        let state = self.lock();
        let data = state.files.get(&handle).ok_or(StatusCode::NoSuchFile)?;
        let start = offset as usize;
        if start >= data.len() {
            return Err(StatusCode::Eof);
        }
        let end = data.len().min(start + len as usize);
        Ok(Data {
            id,
            data: data[start..end].to_vec(),
        })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let mut state = self.lock();
        let file = state.files.get_mut(&handle).ok_or(StatusCode::NoSuchFile)?;
        let start = offset as usize;
        if file.len() < start + data.len() {
            file.resize(start + data.len(), 0);
        }
        file[start..start + data.len()].copy_from_slice(&data);
        Ok(status_ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        if !self.lock().folders.contains_key(&path) {
            return Err(StatusCode::NoSuchFile);
        }
        Ok(Handle { id, handle: path })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let mut state = self.lock();
        if !state.exhausted.insert(handle.clone()) {
            return Err(StatusCode::Eof);
        }
        let files = state.folders.get(&handle).cloned().unwrap_or_default();
        Ok(Name { id, files })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        match self.lock().files.remove(&filename) {
            Some(_) => Ok(status_ok(id)),
            None => Err(StatusCode::NoSuchFile),
        }
    }
}
