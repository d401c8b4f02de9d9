//! File-access operations the checks need from an open session.

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::RawSftpSession;
use russh_sftp::protocol::{File, FileAttributes as Attributes, OpenFlags, StatusCode};
use sftp_exporter_core::FileAttributes;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("SFTP error: {0}")]
    Sftp(#[from] SftpError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A directory entry with the attributes the server reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub attrs: FileAttributes,
}

/// Remote file operations used by the check strategies.
///
/// Listings are returned exactly as the server sent them, including `.`
/// and `..` when present.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn list_names(&self, folder: &str) -> Result<Vec<String>, RemoteError>;

    async fn list_entries(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Copy the local file at `local` to `remote`, replacing it.
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Copy `remote` into the local file at `local`, replacing it.
    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    async fn remove(&self, remote: &str) -> Result<(), RemoteError>;
}

/// Join a file name onto a remote folder using `/` separators.
pub fn remote_join(folder: &str, name: &str) -> String {
    if name.starts_with('/') || folder.is_empty() {
        name.to_string()
    } else if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

/// Bytes requested per read or write packet.
const CHUNK_LEN: u32 = 32 * 1024;

fn is_eof(error: &SftpError) -> bool {
    matches!(error, SftpError::Status(status) if status.status_code == StatusCode::Eof)
}

/// [`RemoteFs`] over an SFTP subsystem channel.
///
/// Works on the raw packet session so directory listings keep every entry
/// the server sends.
pub struct SftpRemote {
    session: RawSftpSession,
}

impl SftpRemote {
    /// Run the SFTP version handshake on an open subsystem stream.
    pub async fn start<S>(stream: S) -> Result<Self, RemoteError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = RawSftpSession::new(stream);
        session.init().await?;
        Ok(Self { session })
    }

    pub fn close(&self) -> Result<(), RemoteError> {
        self.session.close_session()?;
        Ok(())
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<File>, RemoteError> {
        let handle = self.session.opendir(folder).await?.handle;
        let mut files = Vec::new();
        let listed = loop {
            match self.session.readdir(handle.as_str()).await {
                Ok(name) => files.extend(name.files),
                Err(e) if is_eof(&e) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.session.close(handle).await;
        listed?;
        closed?;
        Ok(files)
    }
}

#[async_trait]
impl RemoteFs for SftpRemote {
    async fn list_names(&self, folder: &str) -> Result<Vec<String>, RemoteError> {
        let files = self.read_dir(folder).await?;
        Ok(files.into_iter().map(|file| file.filename).collect())
    }

    async fn list_entries(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let files = self.read_dir(folder).await?;
        Ok(files
            .into_iter()
            .map(|file| RemoteEntry {
                name: file.filename,
                attrs: FileAttributes {
                    mtime: file.attrs.mtime.map(u64::from),
                    atime: file.attrs.atime.map(u64::from),
                    size: file.attrs.size,
                },
            })
            .collect())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let data = tokio::fs::read(local).await?;
        let flags = OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE;
        let handle = self
            .session
            .open(remote, flags, Attributes::empty())
            .await?
            .handle;

        let mut offset = 0u64;
        let mut written = Ok(());
        for chunk in data.chunks(CHUNK_LEN as usize) {
            if let Err(e) = self.session.write(handle.as_str(), offset, chunk.to_vec()).await {
                written = Err(e);
                break;
            }
            offset += chunk.len() as u64;
        }
        let closed = self.session.close(handle).await;
        written?;
        closed?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let handle = self
            .session
            .open(remote, OpenFlags::READ, Attributes::empty())
            .await?
            .handle;

        let mut data = Vec::new();
        let read = loop {
            match self.session.read(handle.as_str(), data.len() as u64, CHUNK_LEN).await {
                Ok(chunk) if chunk.data.is_empty() => break Ok(()),
                Ok(chunk) => data.extend_from_slice(&chunk.data),
                Err(e) if is_eof(&e) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.session.close(handle).await;
        read?;
        closed?;

        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn remove(&self, remote: &str) -> Result<(), RemoteError> {
        self.session.remove(remote).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySftpServer;
    use tempfile::NamedTempFile;

    fn entry(name: &str, mtime: u32, size: u64) -> File {
        File::new(
            name,
            Attributes {
                mtime: Some(mtime),
                atime: Some(mtime + 1),
                size: Some(size),
                ..Attributes::default()
            },
        )
    }

    fn listing() -> Vec<File> {
        vec![entry(".", 10, 0), entry("..", 20, 0), entry("data.bin", 1000, 5)]
    }

    #[tokio::test]
    async fn test_listing_keeps_dot_entries() {
        let server = MemorySftpServer::with_folder("www", listing());
        let remote = server.connect().await;

        assert_eq!(remote.list_names("www").await.unwrap(), vec![".", "..", "data.bin"]);

        let entries = remote.list_entries("www").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "data.bin"]);
        assert_eq!(
            entries[2].attrs,
            FileAttributes { mtime: Some(1000), atime: Some(1001), size: Some(5) }
        );
    }

    #[tokio::test]
    async fn test_listing_missing_folder_fails() {
        let server = MemorySftpServer::with_folder("www", listing());
        let remote = server.connect().await;

        assert!(matches!(remote.list_names("missing").await, Err(RemoteError::Sftp(_))));
        assert_eq!(remote.list_names("www").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_download_remove() {
        let server = MemorySftpServer::with_folder("www", Vec::new());
        let remote = server.connect().await;

        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let source = NamedTempFile::new().unwrap();
        tokio::fs::write(source.path(), &contents).await.unwrap();

        remote.upload(source.path(), "www/.health-check").await.unwrap();
        assert_eq!(server.file("www/.health-check").unwrap(), contents);

        let destination = NamedTempFile::new().unwrap();
        remote.download("www/.health-check", destination.path()).await.unwrap();
        assert_eq!(tokio::fs::read(destination.path()).await.unwrap(), contents);

        remote.remove("www/.health-check").await.unwrap();
        assert_eq!(server.file("www/.health-check"), None);
        assert!(remote.remove("www/.health-check").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_file() {
        let server = MemorySftpServer::with_folder("www", Vec::new());
        let remote = server.connect().await;

        let long = NamedTempFile::new().unwrap();
        tokio::fs::write(long.path(), b"a longer first version").await.unwrap();
        remote.upload(long.path(), "www/.health-check").await.unwrap();

        let short = NamedTempFile::new().unwrap();
        tokio::fs::write(short.path(), b"short").await.unwrap();
        remote.upload(short.path(), "www/.health-check").await.unwrap();

        assert_eq!(server.file("www/.health-check").unwrap(), b"short".to_vec());
    }

    #[tokio::test]
    async fn test_download_missing_file_fails() {
        let server = MemorySftpServer::with_folder("www", Vec::new());
        let remote = server.connect().await;
        let destination = NamedTempFile::new().unwrap();

        assert!(remote.download("www/nothing", destination.path()).await.is_err());
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("www", ".health-check"), "www/.health-check");
        assert_eq!(remote_join("www/", ".health-check"), "www/.health-check");
        assert_eq!(remote_join("", ".health-check"), ".health-check");
        assert_eq!(remote_join("www", "/tmp/.health-check"), "/tmp/.health-check");
    }
}
