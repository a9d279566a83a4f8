//! sshdeck - a multiplexed SSH session manager
//!
//! Opens authenticated SSH transports, keeps one interactive shell per
//! session, and runs one-shot commands and SFTP transfers over the same
//! transport on short-lived channels of their own.

pub mod commands;
pub mod config;
pub mod session;
pub mod sftp;
pub mod ssh;

pub use commands::{CommandResult, ProbeResult, SshCommands};
pub use config::ManagerSettings;
pub use session::{Session, SessionEvent, SessionRegistry, ShellStream};
pub use ssh::{AuthType, ConnectionConfig, SshError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Calling it again (or after
/// another subscriber was installed) is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
