//! Session Types and Data Structures

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Negotiation in progress
    Connecting,
    /// Transport authenticated; the shell may or may not be ready
    Ready,
    /// Closed normally (disconnect, shell exit, transport close)
    Ended,
    /// Closed because the shell channel failed
    Errored,
}

impl SessionState {
    /// Terminal states are never left and trigger registry eviction
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Errored)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Ended => write!(f, "ended"),
            SessionState::Errored => write!(f, "errored"),
        }
    }
}

/// Session info for diagnostics. Never carries credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub shell_ready: bool,
    pub created_at: DateTime<Utc>,
}
