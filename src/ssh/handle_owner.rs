//! Handle Owner Task
//!
//! This module implements the "single owner" pattern for the SSH transport.
//!
//! # Architecture
//!
//! Only one task owns the `Handle<ClientHandler>`. The shell, exec and SFTP
//! code paths talk to it through a cloneable `HandleController` which sends
//! commands over an mpsc channel.
//!
//! This avoids:
//! - `Arc<Mutex<Handle>>` lock contention
//! - Deadlocks from holding locks across `.await`
//! - Protocol violations from concurrent Handle access
//!
//! The owner task also watches the transport: when russh reports the
//! connection closed (keepalive exhaustion, server hang-up) it broadcasts a
//! disconnect notification, the same one an explicit disconnect produces.

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// How often the owner task checks whether the transport is gone
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (shell, exec or SFTP subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (two senders). Any holder can open channels or
/// disconnect, so controllers never leave the owning `Session`.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Fired once when the transport goes away, for whatever reason.
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    fn new(cmd_tx: mpsc::Sender<HandleCommand>, disconnect_tx: broadcast::Sender<()>) -> Self {
        Self {
            cmd_tx,
            disconnect_tx,
        }
    }

    /// Subscribe to transport disconnect notifications.
    ///
    /// Use this in `tokio::select!` to abort in-flight work when the
    /// session goes away.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::Channel(e.to_string()))
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending
/// commands, plus a disconnect receiver subscribed before the task starts. A
/// transport that dies immediately is still observed through that receiver.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> (HandleController, broadcast::Receiver<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, disconnect_rx) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let mut handle = handle;
        let mut liveness = tokio::time::interval(LIVENESS_POLL_INTERVAL);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Handle owner task started for session {}", session_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!(
                                "Caller dropped before receiving channel_open_session result"
                            );
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for session {}", session_id);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for session {}", session_id);
                        break;
                    }
                },

                _ = liveness.tick() => {
                    if handle.is_closed() {
                        info!("Transport closed for session {}", session_id);
                        break;
                    }
                }
            }
        }

        // Notify subscribers before the drain so in-flight operations fail fast
        let _ = disconnect_tx_clone.send(());

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        debug!("Handle owner task terminated for session {}", session_id);
    });

    (HandleController::new(cmd_tx, disconnect_tx), disconnect_rx)
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

/// Owner-task double for tests: no transport behind it.
///
/// Channel opens are refused with `Disconnect`; a `Disconnect` command (or
/// dropping every controller) ends the task and fires the disconnect
/// notification exactly like the real owner.
#[cfg(test)]
pub(crate) fn spawn_detached_owner() -> (HandleController, broadcast::Receiver<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, disconnect_rx) = broadcast::channel::<()>(1);
    let notify = disconnect_tx.clone();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let _ = reply_tx.send(Err(russh::Error::Disconnect));
                }
                HandleCommand::Disconnect => break,
            }
        }
        let _ = notify.send(());
        drain_pending_commands(&mut cmd_rx);
    });

    (HandleController::new(cmd_tx, disconnect_tx), disconnect_rx)
}
