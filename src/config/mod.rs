//! Configuration Management Module
//!
//! Manager tunables and their JSON settings file.

pub mod storage;
pub mod types;

pub use storage::{
    config_dir, load_settings, load_settings_or_default, save_settings, settings_file,
    StorageError,
};
pub use types::{ManagerSettings, SETTINGS_VERSION};
