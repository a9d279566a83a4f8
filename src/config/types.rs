//! Settings types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current settings file version
pub const SETTINGS_VERSION: u32 = 1;

/// Tunables for the session manager. Every field has a default, so a partial
/// (or empty) settings file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerSettings {
    /// Settings file version
    pub version: u32,

    /// Handshake + authentication bound for `connect`
    pub ready_timeout_secs: u64,

    /// Transport keepalive probe interval
    pub keepalive_interval_secs: u64,

    /// Missed keepalives before the transport is considered dead
    pub keepalive_max: usize,

    /// Bound for one `executeCommand` call
    pub exec_timeout_secs: u64,

    /// Bound for one connectivity probe
    pub probe_timeout_secs: u64,

    /// Pseudo-terminal type requested for the shell channel
    pub terminal_type: String,

    /// Initial terminal geometry
    pub initial_cols: u32,
    pub initial_rows: u32,

    /// Per-session event channel capacity
    pub event_buffer: usize,

    /// Shell output retained for late subscribers (bytes)
    pub replay_bytes: usize,

    /// Default destination for downloads without an explicit local path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            ready_timeout_secs: 30,
            keepalive_interval_secs: 10,
            keepalive_max: 3,
            exec_timeout_secs: 30,
            probe_timeout_secs: 10,
            terminal_type: "xterm-256color".to_string(),
            initial_cols: 80,
            initial_rows: 24,
            event_buffer: 1024,
            replay_bytes: 64 * 1024,
            download_dir: None,
        }
    }
}

impl ManagerSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Configured download directory, else the platform's, else `~/Downloads`
    pub fn resolve_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
