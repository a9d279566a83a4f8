//! SSH Session Commands
//!
//! The boundary surface handed to a UI or IPC layer. Every operation returns
//! a serializable result; failures are carried in the result, never raised.
//!
//! # Commands
//!
//! - `probe` - check reachability without creating a session
//! - `connect` - negotiate and register a session
//! - `write` / `resize` - interactive shell input and PTY size
//! - `execute` - one-shot command on its own channel
//! - `download` / `upload` - SFTP transfers
//! - `disconnect` / `list_sessions` / `subscribe`

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::session::{SessionInfo, SessionRegistry, ShellStream};
use crate::ssh::{probe, ConnectionConfig, SshError};

/// Outcome of a per-session command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn with_output(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn from_error(err: SshError) -> Self {
        match err {
            // Partial stdout is still useful to the caller
            SshError::CommandFailed {
                message, stdout, ..
            } => Self {
                success: false,
                output: (!stdout.is_empty()).then_some(stdout),
                error: Some(message),
                ..Default::default()
            },
            other => Self::failed(other.to_string()),
        }
    }
}

/// Outcome of `probe`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Command surface over one registry
#[derive(Clone)]
pub struct SshCommands {
    registry: Arc<SessionRegistry>,
}

impl SshCommands {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn missing(session_id: &str) -> CommandResult {
        CommandResult::failed(SshError::NoActiveConnection(session_id.to_string()).to_string())
    }

    pub async fn probe(&self, config: &ConnectionConfig) -> ProbeResult {
        let outcome = probe(config, self.registry.settings()).await;
        ProbeResult {
            reachable: outcome.reachable,
            error: outcome.error.map(|e| e.user_message(config)),
        }
    }

    pub async fn connect(&self, config: ConnectionConfig) -> CommandResult {
        info!("Connect request: {}@{}", config.username, config.address());
        match self.registry.create(config.clone()).await {
            Ok(session_id) => CommandResult {
                success: true,
                session_id: Some(session_id),
                ..Default::default()
            },
            Err(e) => {
                warn!("Connect to {} failed: {}", config.address(), e);
                CommandResult::failed(e.user_message(&config))
            }
        }
    }

    pub async fn write(&self, session_id: &str, data: &[u8]) -> CommandResult {
        let Some(session) = self.registry.get(session_id) else {
            return Self::missing(session_id);
        };
        if session.write_to_shell(data).await {
            CommandResult::ok()
        } else {
            CommandResult::failed("Shell channel is not ready")
        }
    }

    pub async fn resize(&self, session_id: &str, cols: u32, rows: u32) -> CommandResult {
        let Some(session) = self.registry.get(session_id) else {
            return Self::missing(session_id);
        };
        if session.resize_terminal(cols, rows).await {
            CommandResult::ok()
        } else {
            CommandResult::failed("Shell channel is not ready")
        }
    }

    pub async fn execute(&self, session_id: &str, command: &str) -> CommandResult {
        let Some(session) = self.registry.get(session_id) else {
            return Self::missing(session_id);
        };
        match session.execute_command(command).await {
            Ok(output) => CommandResult::with_output(output),
            Err(e) => CommandResult::from_error(e),
        }
    }

    pub async fn download(
        &self,
        session_id: &str,
        remote_path: &str,
        local_path: Option<&Path>,
    ) -> CommandResult {
        let Some(session) = self.registry.get(session_id) else {
            return Self::missing(session_id);
        };
        match session.download_file(remote_path, local_path).await {
            Ok(summary) => CommandResult::with_output(summary.to_string()),
            Err(e) => CommandResult::from_error(e),
        }
    }

    pub async fn upload(
        &self,
        session_id: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> CommandResult {
        let Some(session) = self.registry.get(session_id) else {
            return Self::missing(session_id);
        };
        match session.upload_file(local_path, remote_path).await {
            Ok(summary) => CommandResult::with_output(summary.to_string()),
            Err(e) => CommandResult::from_error(e),
        }
    }

    pub async fn disconnect(&self, session_id: &str) -> CommandResult {
        CommandResult {
            success: self.registry.disconnect(session_id).await,
            ..Default::default()
        }
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn list_session_info(&self) -> Vec<SessionInfo> {
        self.registry.list_info()
    }

    /// Shell output stream for a session, backlog first
    pub fn subscribe(&self, session_id: &str) -> Result<ShellStream, SshError> {
        self.registry
            .get(session_id)
            .map(|session| session.subscribe())
            .ok_or_else(|| SshError::NoActiveConnection(session_id.to_string()))
    }

    /// Disconnect everything (process shutdown)
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerSettings;
    use crate::session::{Session, SessionEvent};
    use crate::ssh::spawn_detached_owner;

    fn commands() -> SshCommands {
        SshCommands::new(SessionRegistry::new(ManagerSettings::default()))
    }

    fn register_detached(commands: &SshCommands) -> String {
        let (controller, disconnect_rx) = spawn_detached_owner();
        let session = Arc::new(Session::new(
            "detached-1".to_string(),
            ConnectionConfig::with_password("h", 22, "u", "p"),
            ManagerSettings::default(),
            controller,
        ));
        session.spawn_lifecycle(disconnect_rx, None);
        session.mark_ready();
        assert!(commands.registry().insert(session));
        "detached-1".to_string()
    }

    fn assert_no_connection(result: &CommandResult) {
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("No active connection"));
    }

    #[tokio::test]
    async fn test_unknown_session_operations_fail_cleanly() {
        let commands = commands();
        let id = "does-not-exist";

        assert_no_connection(&commands.write(id, b"x").await);
        assert_no_connection(&commands.resize(id, 80, 24).await);
        assert_no_connection(&commands.execute(id, "true").await);
        assert_no_connection(&commands.download(id, "/etc/hosts", None).await);
        assert_no_connection(&commands.upload(id, Path::new("/tmp/x"), "/tmp/x").await);
        assert!(!commands.disconnect(id).await.success);
        assert!(matches!(
            commands.subscribe(id),
            Err(SshError::NoActiveConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let commands = commands();
        let id = register_detached(&commands);
        assert_eq!(commands.list_sessions(), vec![id.clone()]);

        assert!(commands.disconnect(&id).await.success);
        assert!(!commands.disconnect(&id).await.success);
        assert!(commands.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_write_without_shell_reports_failure() {
        let commands = commands();
        let id = register_detached(&commands);
        let result = commands.write(&id, b"ls\n").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Shell channel is not ready"));
    }

    #[tokio::test]
    async fn test_subscribe_sees_close_on_shutdown() {
        let commands = commands();
        let id = register_detached(&commands);
        let mut stream = commands.subscribe(&id).unwrap();

        commands.shutdown().await;
        assert!(commands.list_sessions().is_empty());
        assert_eq!(
            stream.recv().await,
            Some(SessionEvent::Closed(crate::session::CloseReason::Disconnected))
        );
    }

    #[tokio::test]
    async fn test_connect_failure_carries_user_message() {
        let commands = commands();
        let config = ConnectionConfig::with_key("h.invalid", 22, "u", "/nonexistent/key", None);
        let result = commands.connect(config).await;
        assert!(!result.success);
        assert!(result.session_id.is_none());
        assert!(result
            .error
            .unwrap()
            .contains("Could not read the private key file"));
        assert!(commands.list_sessions().is_empty());
    }

    #[test]
    fn test_command_failed_keeps_stdout() {
        let result = CommandResult::from_error(SshError::CommandFailed {
            exit_code: Some(7),
            message: "Command exited with code 7".into(),
            stdout: "partial".into(),
        });
        assert!(!result.success);
        assert_eq!(result.output.as_deref(), Some("partial"));
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"success":false,"output":"partial","error":"Command exited with code 7"}"#
        );
    }

    #[test]
    fn test_success_serialization_skips_empty_fields() {
        assert_eq!(
            serde_json::to_string(&CommandResult::ok()).unwrap(),
            r#"{"success":true}"#
        );
    }
}
