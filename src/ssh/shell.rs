//! Interactive shell channel
//!
//! The shell channel lives as long as its session. One task owns the
//! `Channel`; writes and resizes reach it through an mpsc queue and output
//! is published to the session's `EventHub` in arrival order.

use std::sync::Arc;

use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::error::SshError;
use super::handle_owner::HandleController;
use crate::config::ManagerSettings;
use crate::session::EventHub;

/// Commands that can be sent to the shell task
#[derive(Debug)]
pub enum ShellCommand {
    /// Data to send to the remote shell's stdin
    Data(Vec<u8>),
    /// Resize the PTY
    Resize { cols: u32, rows: u32 },
    /// Close the channel
    Close,
}

/// How the shell task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// Remote side closed the channel (user typed `exit`, transport gone)
    Remote,
    /// We asked it to close
    Requested,
    /// Writing to the channel failed
    Failed,
}

/// Open a session channel, allocate a PTY and start a login shell
pub async fn open_shell(
    controller: &HandleController,
    settings: &ManagerSettings,
    session_id: &str,
) -> Result<Channel<Msg>, SshError> {
    let channel = controller.open_session_channel().await?;

    debug!("Channel opened, requesting PTY for session {}", session_id);

    channel
        .request_pty(
            false,
            &settings.terminal_type,
            settings.initial_cols,
            settings.initial_rows,
            0,
            0,
            &[],
        )
        .await
        .map_err(|e| SshError::Channel(format!("PTY request failed: {}", e)))?;

    channel
        .request_shell(false)
        .await
        .map_err(|e| SshError::Channel(format!("Shell request failed: {}", e)))?;

    info!("Interactive shell started for session {}", session_id);
    Ok(channel)
}

/// Spawn the task that owns the shell channel.
///
/// Returns the command sender and a receiver that resolves when the task ends.
pub fn spawn_shell_task(
    mut channel: Channel<Msg>,
    hub: Arc<EventHub>,
    session_id: String,
) -> (mpsc::Sender<ShellCommand>, oneshot::Receiver<ShellExit>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ShellCommand>(1024);
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        debug!("Shell channel handler started for session {}", session_id);

        let exit = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ShellCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to shell of session {}: {}", session_id, e);
                            hub.publish_error(format!("Shell write failed: {}", e));
                            break ShellExit::Failed;
                        }
                    }
                    Some(ShellCommand::Resize { cols, rows }) => {
                        // A failed resize leaves the shell usable
                        if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                            error!("Failed to resize PTY of session {}: {}", session_id, e);
                        } else {
                            debug!("PTY resized to {}x{} for session {}", cols, rows, session_id);
                        }
                    }
                    Some(ShellCommand::Close) | None => {
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break ShellExit::Requested;
                    }
                },

                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        hub.publish_data(Bytes::copy_from_slice(&data));
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // stderr goes to the terminal like stdout
                        if ext == 1 {
                            hub.publish_data(Bytes::copy_from_slice(&data));
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Shell exit status {} for session {}", exit_status, session_id);
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("Shell EOF for session {}", session_id);
                    }
                    Some(ChannelMsg::Close) | None => {
                        info!("Shell channel closed for session {}", session_id);
                        break ShellExit::Remote;
                    }
                    Some(_) => {}
                },
            }
        };

        debug!("Shell channel handler terminated for session {} ({:?})", session_id, exit);
        let _ = exit_tx.send(exit);
    });

    (cmd_tx, exit_rx)
}
