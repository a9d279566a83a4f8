//! Session Management Module
//!
//! Provides:
//! - `Session`: one transport with its shell, exec and SFTP channels
//! - `SessionRegistry`: the owned set of live sessions, DashMap backed
//! - Shell output fan-out with a replay backlog (`EventHub`, `ShellStream`)

pub mod events;
mod instance;
mod registry;
pub mod types;

pub use events::{CloseReason, EventHub, SessionEvent, ShellStream};
pub use instance::Session;
pub use registry::SessionRegistry;
pub use types::{SessionInfo, SessionState};
