//! Well-known filesystem locations

use std::path::PathBuf;

use crate::constants::paths::{CONFIG_FILE_NAME, DATA_DIR_NAME, LOGS_DIR_NAME};
use crate::constants::storage::DATABASE_FILE_NAME;

/// Root data directory (~/.local/share/govern on Linux)
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Default database location
pub fn database_path() -> PathBuf {
    data_dir().join(DATABASE_FILE_NAME)
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    data_dir().join(LOGS_DIR_NAME)
}

/// User-level config file (~/.config/govern/govern.toml)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(DATA_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Project-local config file in the working directory
pub fn local_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE_NAME)
}
