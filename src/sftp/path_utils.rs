//! Path helpers for SFTP transfers
//!
//! Remote SFTP paths always use `/` (even on Windows servers); local paths
//! use the platform separator and may start with `~`.

use std::path::{Path, PathBuf};

use crate::ssh::expand_tilde;

/// Fallback file name when the remote path has no usable base name
const DEFAULT_DOWNLOAD_NAME: &str = "download";

/// Last component of a remote path, ignoring trailing slashes.
///
/// Returns `None` for `/`, empty paths and `.`/`..`.
pub fn remote_basename(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Where a download lands when the caller gives no local path
pub fn default_download_path(remote_path: &str, download_dir: &Path) -> PathBuf {
    download_dir.join(remote_basename(remote_path).unwrap_or(DEFAULT_DOWNLOAD_NAME))
}

/// Expand `~` in a caller-supplied local path
pub fn resolve_local_path(path: &Path) -> PathBuf {
    expand_tilde(path)
}
