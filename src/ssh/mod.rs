//! SSH module - connection negotiation and channels
//!
//! Built on the russh library.
//!
//! # Features
//! - Two-tier algorithm negotiation (modern suite, then a legacy fallback)
//! - Password and private key authentication with default key discovery
//! - Single-owner transport task (`handle_owner`)
//! - Interactive shell, one-shot exec and reachability probing

mod algorithms;
mod auth;
mod client;
mod config;
mod error;
mod exec;
mod handle_owner;
mod probe;
mod shell;

pub use algorithms::{fallback_suite, primary_suite, AlgorithmTier};
pub use auth::{
    authenticate, default_key_paths, discover_default_key, expand_tilde, plan_authentication,
    resolve_credentials, resolve_credentials_in, AuthPlan, Credentials, KeyMaterial, KeySource,
};
pub use client::{resolve_address, transport_config, with_fallback, ClientHandler, Connected, SshClient};
pub use config::{AuthType, ConnectionConfig, Secret};
pub use error::SshError;
pub use exec::{execute_command, ExecCollector};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use probe::{probe, reachability, ProbeOutcome};
pub use shell::{open_shell, spawn_shell_task, ShellCommand, ShellExit};

#[cfg(test)]
pub(crate) use handle_owner::spawn_detached_owner;
