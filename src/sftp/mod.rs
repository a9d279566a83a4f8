//! SFTP file transfer over an existing session
//!
//! Upload and download only; each call gets its own subsystem channel.

pub mod path_utils;
pub mod transfer;

pub use path_utils::{default_download_path, remote_basename, resolve_local_path};
pub use transfer::{download_file, open_sftp, upload_file, TransferDirection, TransferSummary};
