//! Commands module
//!
//! The operation surface exposed to whatever drives the session manager
//! (a UI bridge, an IPC server or the bundled CLI).

pub mod ssh;

pub use ssh::{CommandResult, ProbeResult, SshCommands};
