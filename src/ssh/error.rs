//! SSH Error types
//!
//! Every failure a public operation can surface is one of these variants.
//! Raw `russh` errors are classified on the way in so callers never have to
//! parse transport strings.

use thiserror::Error;

use super::config::ConnectionConfig;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Host unresolvable: {0}")]
    HostUnresolvable(String),

    #[error("Algorithm negotiation failed: {0}")]
    AlgorithmNegotiation(String),

    #[error("Key read error: {0}")]
    KeyRead(String),

    #[error("No authentication method available")]
    NoAuthMethod,

    #[error("Command timed out after {0} seconds")]
    CommandTimeout(u64),

    #[error("{message}")]
    CommandFailed {
        exit_code: Option<u32>,
        message: String,
        stdout: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("No active connection: {0}")]
    NoActiveConnection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("SSH protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disconnected")]
    Disconnected,
}

impl SshError {
    /// Negotiation failures are recovered by the fallback tier.
    pub fn is_algorithm_negotiation(&self) -> bool {
        matches!(self, SshError::AlgorithmNegotiation(_))
    }

    /// The server answered and rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, SshError::Authentication(_))
    }

    /// Render a cause-specific message naming what to check in the config.
    pub fn user_message(&self, config: &ConnectionConfig) -> String {
        let target = format!("{}@{}:{}", config.username, config.host, config.port);
        match self {
            SshError::Authentication(detail) => format!(
                "Authentication failed for {}. Check the username, the password and, \
                 if set, the private key path{}. ({})",
                target,
                config
                    .private_key_path
                    .as_deref()
                    .map(|p| format!(" ({})", p))
                    .unwrap_or_default(),
                detail
            ),
            SshError::Timeout(_) => format!(
                "Connection to {} timed out. Check that the host is online, the port is \
                 correct and no firewall is dropping SSH traffic.",
                target
            ),
            SshError::ConnectionRefused(_) => format!(
                "Connection to {}:{} was refused. Check that an SSH server is running and \
                 listening on port {}.",
                config.host, config.port, config.port
            ),
            SshError::HostUnresolvable(_) => format!(
                "Could not resolve host '{}'. Check the host name for typos and your DNS \
                 settings.",
                config.host
            ),
            SshError::AlgorithmNegotiation(detail) => format!(
                "Could not agree on encryption algorithms with {} even with the \
                 compatibility suite. The server may require algorithms that are not \
                 supported. ({})",
                target, detail
            ),
            SshError::KeyRead(detail) => format!(
                "Could not read the private key file. Check that the path exists and is \
                 readable, or supply a password. ({})",
                detail
            ),
            SshError::NoAuthMethod => format!(
                "No authentication method available for {}. Set a password or a private \
                 key path, or place a key in ~/.ssh.",
                target
            ),
            other => other.to_string(),
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(io) => classify_io(io),
            other => classify_message(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyRead(err.to_string())
    }
}

fn classify_io(err: std::io::Error) -> SshError {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionRefused => SshError::ConnectionRefused(err.to_string()),
        ErrorKind::TimedOut => SshError::Timeout(err.to_string()),
        _ => SshError::Io(err),
    }
}

/// Map a transport error string onto the taxonomy.
pub(crate) fn classify_message(message: String) -> SshError {
    let lower = message.to_lowercase();
    if lower.contains("no common") {
        SshError::AlgorithmNegotiation(message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        SshError::Timeout(message)
    } else if lower.contains("connection refused") {
        SshError::ConnectionRefused(message)
    } else if lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
    {
        SshError::HostUnresolvable(message)
    } else {
        SshError::Protocol(message)
    }
}

// Serialized as its display string for the UI boundary
impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
