//! SFTP file transfer
//!
//! Every transfer opens its own SFTP subsystem channel and closes it when
//! done, success or not. A session disconnect aborts an in-flight transfer
//! with an error instead of leaving the caller waiting.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use russh_sftp::client::SftpSession;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ssh::{HandleController, SshError};

/// Which way the bytes went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// What a completed transfer moved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes: u64,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            TransferDirection::Download => write!(
                f,
                "Downloaded {} ({} bytes) to {}",
                self.remote_path,
                self.bytes,
                self.local_path.display()
            ),
            TransferDirection::Upload => write!(
                f,
                "Uploaded {} ({} bytes) to {}",
                self.local_path.display(),
                self.bytes,
                self.remote_path
            ),
        }
    }
}

/// Open an SFTP subsystem on a fresh channel
pub async fn open_sftp(
    controller: &HandleController,
    session_id: &str,
) -> Result<SftpSession, SshError> {
    let channel = controller.open_session_channel().await?;

    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| SshError::Transfer(format!("Failed to request SFTP subsystem: {}", e)))?;

    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| SshError::Transfer(format!("SFTP initialization failed: {}", e)))?;

    debug!("SFTP subsystem opened for session {}", session_id);
    Ok(sftp)
}

/// Copy `remote_path` to `local_path`, creating parent directories
pub async fn download_file(
    controller: &HandleController,
    remote_path: &str,
    local_path: &Path,
    session_id: &str,
) -> Result<TransferSummary, SshError> {
    info!(
        "Downloading {} -> {:?} on session {}",
        remote_path, local_path, session_id
    );

    let mut disconnect_rx = controller.subscribe_disconnect();
    let sftp = open_sftp(controller, session_id).await?;

    let result = download_inner(&sftp, remote_path, local_path, &mut disconnect_rx).await;
    close_sftp(sftp, session_id).await;

    let bytes = result?;
    info!("Download of {} complete ({} bytes)", remote_path, bytes);

    Ok(TransferSummary {
        direction: TransferDirection::Download,
        local_path: local_path.to_path_buf(),
        remote_path: remote_path.to_string(),
        bytes,
    })
}

async fn download_inner(
    sftp: &SftpSession,
    remote_path: &str,
    local_path: &Path,
    disconnect_rx: &mut broadcast::Receiver<()>,
) -> Result<u64, SshError> {
    let open = async {
        sftp.open(remote_path)
            .await
            .map_err(|e| remote_error(remote_path, e))
    };
    let mut remote = until_disconnect(open, disconnect_rx).await?;
    receive_into(&mut remote, local_path, remote_path, disconnect_rx).await
}

/// Stream `reader` into a new file at `local_path`. A failed or aborted
/// transfer leaves no partial file behind.
async fn receive_into<R>(
    reader: &mut R,
    local_path: &Path,
    label: &str,
    disconnect_rx: &mut broadcast::Receiver<()>,
) -> Result<u64, SshError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| local_error(parent, e))?;
        }
    }

    let mut local = tokio::fs::File::create(local_path)
        .await
        .map_err(|e| local_error(local_path, e))?;

    let result = until_disconnect(copy_stream(reader, &mut local, label), disconnect_rx).await;
    if result.is_err() {
        drop(local);
        if let Err(e) = tokio::fs::remove_file(local_path).await {
            warn!("Failed to remove partial download {:?}: {}", local_path, e);
        }
    }
    result
}

/// Copy `local_path` to `remote_path`, replacing any existing remote file
pub async fn upload_file(
    controller: &HandleController,
    local_path: &Path,
    remote_path: &str,
    session_id: &str,
) -> Result<TransferSummary, SshError> {
    info!(
        "Uploading {:?} -> {} on session {}",
        local_path, remote_path, session_id
    );

    // A missing local file fails before any channel is opened
    let mut local = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| local_error(local_path, e))?;

    let mut disconnect_rx = controller.subscribe_disconnect();
    let sftp = open_sftp(controller, session_id).await?;

    let result = upload_inner(&sftp, &mut local, remote_path, &mut disconnect_rx).await;
    close_sftp(sftp, session_id).await;

    let bytes = result?;
    info!("Upload to {} complete ({} bytes)", remote_path, bytes);

    Ok(TransferSummary {
        direction: TransferDirection::Upload,
        local_path: local_path.to_path_buf(),
        remote_path: remote_path.to_string(),
        bytes,
    })
}

async fn upload_inner(
    sftp: &SftpSession,
    local: &mut tokio::fs::File,
    remote_path: &str,
    disconnect_rx: &mut broadcast::Receiver<()>,
) -> Result<u64, SshError> {
    let create = async {
        sftp.create(remote_path)
            .await
            .map_err(|e| remote_error(remote_path, e))
    };
    let mut remote = until_disconnect(create, disconnect_rx).await?;
    until_disconnect(copy_stream(local, &mut remote, remote_path), disconnect_rx).await
}

/// Copy until EOF, then shut the writer down. Shutting down a remote SFTP
/// file closes its handle so the server flushes it.
async fn copy_stream<R, W>(reader: &mut R, writer: &mut W, label: &str) -> Result<u64, SshError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = tokio::io::copy(reader, writer)
        .await
        .map_err(|e| remote_error(label, e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| remote_error(label, e))?;
    Ok(bytes)
}

/// Run `work` unless the session disconnects first
async fn until_disconnect<T>(
    work: impl Future<Output = Result<T, SshError>>,
    disconnect_rx: &mut broadcast::Receiver<()>,
) -> Result<T, SshError> {
    tokio::select! {
        r = work => r,
        _ = disconnect_rx.recv() => Err(SshError::Disconnected),
    }
}

async fn close_sftp(sftp: SftpSession, session_id: &str) {
    if let Err(e) = sftp.close().await {
        warn!("Failed to close SFTP session for {}: {}", session_id, e);
    }
}

fn remote_error(path: &str, err: impl fmt::Display) -> SshError {
    SshError::Transfer(format!("{}: {}", path, err))
}

fn local_error(path: &Path, err: std::io::Error) -> SshError {
    SshError::Transfer(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::spawn_detached_owner;
    use std::time::Duration;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_summary_display() {
        let summary = TransferSummary {
            direction: TransferDirection::Download,
            local_path: PathBuf::from("/tmp/hosts"),
            remote_path: "/etc/hosts".into(),
            bytes: 12,
        };
        assert_eq!(
            summary.to_string(),
            "Downloaded /etc/hosts (12 bytes) to /tmp/hosts"
        );
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_is_transfer_error() {
        let (controller, _) = spawn_detached_owner();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");

        let err = upload_file(&controller, &missing, "/tmp/nope.bin", "s")
            .await
            .unwrap_err();
        match err {
            SshError::Transfer(msg) => assert!(msg.contains("nope.bin")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_without_channel_fails() {
        let (controller, _) = spawn_detached_owner();
        let dir = tempfile::tempdir().unwrap();

        let err = download_file(&controller, "/etc/hosts", &dir.path().join("hosts"), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Channel(_)));
        assert!(!dir.path().join("hosts").exists());
    }

    #[tokio::test]
    async fn test_upload_then_download_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let original = sample_bytes(256 * 1024 + 17);
        std::fs::write(&source, &original).unwrap();
        let (_disconnect_tx, mut disconnect_rx) = broadcast::channel(1);

        // Upload side: local file into an in-memory remote
        let mut remote: Vec<u8> = Vec::new();
        let mut local = tokio::fs::File::open(&source).await.unwrap();
        let sent = until_disconnect(
            copy_stream(&mut local, &mut remote, "/srv/source.bin"),
            &mut disconnect_rx,
        )
        .await
        .unwrap();

        // Download side: back out into a fresh nested local path
        let target = dir.path().join("nested").join("copy.bin");
        let mut reader: &[u8] = &remote;
        let received = receive_into(&mut reader, &target, "/srv/source.bin", &mut disconnect_rx)
            .await
            .unwrap();

        assert_eq!(sent, original.len() as u64);
        assert_eq!(received, sent);
        assert_eq!(std::fs::read(&target).unwrap(), original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_download_and_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.bin");
        let (disconnect_tx, mut disconnect_rx) = broadcast::channel(1);

        // Remote end sends a little and then stalls
        let (mut remote_tx, mut remote_rx) = tokio::io::duplex(1024);
        remote_tx.write_all(b"first chunk").await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = disconnect_tx.send(());
        });

        let err = receive_into(&mut remote_rx, &target, "/srv/big.iso", &mut disconnect_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Disconnected));
        assert!(!target.exists());
        drop(remote_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_upload() {
        let (disconnect_tx, mut disconnect_rx) = broadcast::channel(1);
        let (_local_tx, mut local_rx) = tokio::io::duplex(1024);
        let mut remote: Vec<u8> = Vec::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = disconnect_tx.send(());
        });

        let err = until_disconnect(
            copy_stream(&mut local_rx, &mut remote, "/srv/upload.bin"),
            &mut disconnect_rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SshError::Disconnected));
    }

    #[tokio::test]
    async fn test_failed_read_removes_partial_file() {
        struct Broken;

        impl AsyncRead for Broken {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "channel reset",
                )))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("broken.bin");
        let (_disconnect_tx, mut disconnect_rx) = broadcast::channel(1);

        let err = receive_into(&mut Broken, &target, "/srv/broken.bin", &mut disconnect_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Transfer(ref m) if m.contains("/srv/broken.bin")));
        assert!(!target.exists());
    }
}
