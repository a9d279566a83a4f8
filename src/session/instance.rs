//! A live SSH session
//!
//! One authenticated transport plus its long-lived shell channel. Exec and
//! SFTP operations open their own short-lived channels on demand. The session
//! reaches a terminal state exactly once: on explicit disconnect, when the
//! transport goes away, or when the remote shell exits.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::events::{CloseReason, EventHub, ShellStream};
use super::types::{SessionInfo, SessionState};
use crate::config::ManagerSettings;
use crate::sftp::{self, TransferSummary};
use crate::ssh::{
    execute_command, open_shell, spawn_handle_owner_task, spawn_shell_task, ConnectionConfig,
    HandleController, ShellCommand, ShellExit, SshClient, SshError,
};

/// How long `finish` waits for the shell task to close its channel before
/// tearing down the transport
const SHELL_CLOSE_GRACE: Duration = Duration::from_secs(1);

pub struct Session {
    id: String,
    /// Kept for diagnostics and error messages; owns no transport resource
    config: ConnectionConfig,
    settings: ManagerSettings,
    created_at: DateTime<Utc>,
    controller: HandleController,
    shell_tx: RwLock<Option<mpsc::Sender<ShellCommand>>>,
    shell_ready: AtomicBool,
    state_tx: watch::Sender<SessionState>,
    events: Arc<EventHub>,
}

impl Session {
    /// Negotiate a transport, start the shell and arm the lifecycle watch.
    ///
    /// Shell setup failure does not fail the connect: the session comes back
    /// `ready` with `shell_ready == false` and an error event is published.
    pub async fn establish(
        config: ConnectionConfig,
        settings: ManagerSettings,
    ) -> Result<Arc<Session>, SshError> {
        let connected = SshClient::new(config.clone(), settings.clone())
            .connect()
            .await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (controller, disconnect_rx) =
            spawn_handle_owner_task(connected.handle, session_id.clone());

        let session = Arc::new(Session::new(session_id, config, settings, controller));
        let shell_exit = session.init_shell().await;
        session.spawn_lifecycle(disconnect_rx, shell_exit);
        session.mark_ready();

        info!(
            "Session {} ready for {} (shell ready: {})",
            session.id,
            session.config.address(),
            session.shell_ready.load(Ordering::SeqCst)
        );
        Ok(session)
    }

    pub(crate) fn new(
        id: String,
        config: ConnectionConfig,
        settings: ManagerSettings,
        controller: HandleController,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let events = Arc::new(EventHub::new(settings.event_buffer, settings.replay_bytes));
        Self {
            id,
            config,
            settings,
            created_at: Utc::now(),
            controller,
            shell_tx: RwLock::new(None),
            shell_ready: AtomicBool::new(false),
            state_tx,
            events,
        }
    }

    async fn init_shell(&self) -> Option<oneshot::Receiver<ShellExit>> {
        match open_shell(&self.controller, &self.settings, &self.id).await {
            Ok(channel) => {
                let (tx, exit_rx) =
                    spawn_shell_task(channel, Arc::clone(&self.events), self.id.clone());
                *self.shell_tx.write() = Some(tx);
                self.shell_ready.store(true, Ordering::SeqCst);
                Some(exit_rx)
            }
            Err(e) => {
                warn!("Shell initialization failed for session {}: {}", self.id, e);
                self.events
                    .publish_error(format!("Shell initialization failed: {}", e));
                None
            }
        }
    }

    /// `connecting` -> `ready`. A session that already ended stays ended.
    pub(crate) fn mark_ready(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        })
    }

    /// Watch for transport loss and shell exit. Holds only a weak reference,
    /// so the session's lifetime stays with the registry.
    pub(crate) fn spawn_lifecycle(
        self: &Arc<Self>,
        mut disconnect_rx: broadcast::Receiver<()>,
        shell_exit: Option<oneshot::Receiver<ShellExit>>,
    ) {
        let weak: Weak<Session> = Arc::downgrade(self);
        let session_id = self.id.clone();

        tokio::spawn(async move {
            let shell_done = async {
                match shell_exit {
                    Some(rx) => rx.await.unwrap_or(ShellExit::Remote),
                    None => std::future::pending().await,
                }
            };

            let reason = tokio::select! {
                _ = disconnect_rx.recv() => CloseReason::TransportClosed,
                exit = shell_done => match exit {
                    ShellExit::Remote => CloseReason::ShellExited,
                    ShellExit::Requested => CloseReason::Disconnected,
                    ShellExit::Failed => CloseReason::ShellFailed,
                },
            };

            match weak.upgrade() {
                Some(session) => {
                    session.finish(reason).await;
                }
                None => debug!("Session {} dropped before lifecycle end", session_id),
            }
        });
    }

    /// Move to the terminal state and release everything. Only the first
    /// call does anything; returns whether this call did.
    async fn finish(&self, reason: CloseReason) -> bool {
        let terminal = match reason {
            CloseReason::ShellFailed => SessionState::Errored,
            _ => SessionState::Ended,
        };

        let transitioned = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });
        if !transitioned {
            return false;
        }

        info!("Session {} closing ({:?})", self.id, reason);

        self.shell_ready.store(false, Ordering::SeqCst);
        let shell_tx = self.shell_tx.write().take();
        if let Some(tx) = shell_tx {
            // The shell task drops its queue once the channel is closed
            let close = async {
                if tx.send(ShellCommand::Close).await.is_ok() {
                    tx.closed().await;
                }
            };
            if tokio::time::timeout(SHELL_CLOSE_GRACE, close).await.is_err() {
                debug!("Shell of session {} did not close in time", self.id);
            }
        }

        self.controller.disconnect().await;
        self.events.close(reason);
        true
    }

    /// Close the shell channel, then the transport. Idempotent.
    pub async fn disconnect(&self) -> bool {
        self.finish(CloseReason::Disconnected).await
    }

    /// Transport connected and shell set up
    pub fn is_connection_active(&self) -> bool {
        self.transport_active() && self.shell_ready.load(Ordering::SeqCst)
    }

    fn transport_active(&self) -> bool {
        !self.state().is_terminal() && self.controller.is_connected()
    }

    fn shell_sender(&self) -> Option<mpsc::Sender<ShellCommand>> {
        if !self.is_connection_active() {
            return None;
        }
        self.shell_tx.read().clone()
    }

    /// Write raw bytes to the shell. `false` means nothing was sent.
    pub async fn write_to_shell(&self, data: &[u8]) -> bool {
        match self.shell_sender() {
            Some(tx) => tx.send(ShellCommand::Data(data.to_vec())).await.is_ok(),
            None => false,
        }
    }

    /// Propagate a PTY size change. Same readiness contract as writes.
    pub async fn resize_terminal(&self, cols: u32, rows: u32) -> bool {
        match self.shell_sender() {
            Some(tx) => tx.send(ShellCommand::Resize { cols, rows }).await.is_ok(),
            None => false,
        }
    }

    fn ensure_transport(&self) -> Result<(), SshError> {
        if self.transport_active() {
            Ok(())
        } else {
            Err(SshError::NoActiveConnection(self.id.clone()))
        }
    }

    /// Run a command on its own exec channel
    pub async fn execute_command(&self, command: &str) -> Result<String, SshError> {
        self.ensure_transport()?;
        execute_command(
            &self.controller,
            command,
            self.settings.exec_timeout(),
            &self.id,
        )
        .await
    }

    /// Download `remote_path`. Without a local path the file lands in the
    /// download directory under its remote base name.
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: Option<&Path>,
    ) -> Result<TransferSummary, SshError> {
        self.ensure_transport()?;
        let local_path = match local_path {
            Some(path) => sftp::resolve_local_path(path),
            None => sftp::default_download_path(remote_path, &self.settings.resolve_download_dir()),
        };
        sftp::download_file(&self.controller, remote_path, &local_path, &self.id).await
    }

    pub async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<TransferSummary, SshError> {
        self.ensure_transport()?;
        let local_path = sftp::resolve_local_path(local_path);
        sftp::upload_file(&self.controller, &local_path, remote_path, &self.id).await
    }

    /// Subscribe to shell output; replays the recent backlog first
    pub fn subscribe(&self) -> ShellStream {
        self.events.subscribe()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            username: self.config.username.clone(),
            state: self.state(),
            shell_ready: self.shell_ready.load(Ordering::SeqCst),
            created_at: self.created_at,
        }
    }
}

/// Sessions backed by the detached owner double, for tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ssh::spawn_detached_owner;

    pub(crate) fn detached_session(host: &str) -> Arc<Session> {
        let (controller, disconnect_rx) = spawn_detached_owner();
        let session = Arc::new(Session::new(
            uuid::Uuid::new_v4().to_string(),
            ConnectionConfig::with_password(host, 22, "tester", "pw"),
            ManagerSettings::default(),
            controller,
        ));
        session.spawn_lifecycle(disconnect_rx, None);
        session.mark_ready();
        session
    }

    /// Detached session with a fake shell: returns the receiving end of the
    /// shell queue and the sender that reports shell exit.
    pub(crate) fn session_with_shell(
        host: &str,
    ) -> (
        Arc<Session>,
        mpsc::Receiver<ShellCommand>,
        oneshot::Sender<ShellExit>,
    ) {
        let (controller, disconnect_rx) = spawn_detached_owner();
        let session = Arc::new(Session::new(
            uuid::Uuid::new_v4().to_string(),
            ConnectionConfig::with_password(host, 22, "tester", "pw"),
            ManagerSettings::default(),
            controller,
        ));

        let (shell_tx, shell_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = oneshot::channel();
        *session.shell_tx.write() = Some(shell_tx);
        session.shell_ready.store(true, Ordering::SeqCst);
        session.spawn_lifecycle(disconnect_rx, Some(exit_rx));
        session.mark_ready();

        (session, shell_rx, exit_tx)
    }
}
