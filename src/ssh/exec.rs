//! One-shot command execution
//!
//! Each call opens its own session channel, so concurrent commands on one
//! session never share a channel and never touch the interactive shell.

use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::SshError;
use super::handle_owner::HandleController;

/// Accumulates stdout/stderr and the exit status of one command
#[derive(Debug, Default)]
pub struct ExecCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
}

impl ExecCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    pub fn push_stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
    }

    pub fn set_exit_status(&mut self, code: u32) {
        self.exit_code = Some(code);
    }

    /// Exit 0 yields stdout; anything else is a `CommandFailed` carrying
    /// stderr (or a generic message) plus whatever stdout was captured.
    pub fn finish(self) -> Result<String, SshError> {
        let stdout = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();

        match self.exit_code {
            Some(0) => Ok(stdout),
            Some(code) => Err(SshError::CommandFailed {
                exit_code: Some(code),
                message: if stderr.is_empty() {
                    format!("Command exited with code {}", code)
                } else {
                    stderr
                },
                stdout,
            }),
            None => Err(SshError::CommandFailed {
                exit_code: None,
                message: if stderr.is_empty() {
                    "Channel closed before the command reported an exit status".to_string()
                } else {
                    stderr
                },
                stdout,
            }),
        }
    }
}

/// Where exec output comes from. Implemented by the russh channel; anything
/// yielding `ChannelMsg`s can stand in for it.
pub(crate) trait ExecChannel {
    async fn next_message(&mut self) -> Option<ChannelMsg>;

    async fn force_close(&mut self);
}

impl ExecChannel for Channel<Msg> {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }

    async fn force_close(&mut self) {
        let _ = self.close().await;
    }
}

/// Run `command` on a fresh exec channel.
///
/// Resolves on channel close after the exit status, on timeout (channel is
/// force-closed) or on session disconnect, whichever comes first.
pub async fn execute_command(
    controller: &HandleController,
    command: &str,
    timeout: Duration,
    session_id: &str,
) -> Result<String, SshError> {
    let mut disconnect_rx = controller.subscribe_disconnect();
    let mut channel = controller.open_session_channel().await?;

    debug!("Exec on session {}: {}", session_id, command);

    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::Channel(format!("Failed to execute command: {}", e)))?;

    let result = collect_output(&mut channel, &mut disconnect_rx, timeout).await;
    match &result {
        Err(SshError::CommandTimeout(_)) => warn!(
            "Exec timed out after {:?} on session {}: {}",
            timeout, session_id, command
        ),
        Err(SshError::Disconnected) => {
            warn!("Exec interrupted on session {}: disconnected", session_id)
        }
        _ => {}
    }
    result
}

/// Drain `channel` until it closes, the deadline passes or the session
/// disconnects. Exactly one of the three decides the outcome.
pub(crate) async fn collect_output<C: ExecChannel>(
    channel: &mut C,
    disconnect_rx: &mut broadcast::Receiver<()>,
    timeout: Duration,
) -> Result<String, SshError> {
    let mut collector = ExecCollector::new();

    let outcome = tokio::time::timeout(timeout, async {
        loop {
            tokio::select! {
                msg = channel.next_message() => match msg {
                    Some(ChannelMsg::Data { data }) => collector.push_stdout(&data),
                    // ext=1 is stderr
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => collector.push_stderr(&data),
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        collector.set_exit_status(exit_status)
                    }
                    Some(ChannelMsg::Close) | None => return Ok(()),
                    Some(_) => {}
                },
                _ = disconnect_rx.recv() => return Err(SshError::Disconnected),
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => {
            channel.force_close().await;
            collector.finish()
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            channel.force_close().await;
            Err(SshError::CommandTimeout(timeout.as_secs()))
        }
    }
}
