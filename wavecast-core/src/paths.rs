//! Well-known file locations.

use std::path::PathBuf;

pub const CONFIG_DIR_NAME: &str = "wavecast";
pub const CONFIG_FILE_NAME: &str = "wavecast.toml";
pub const JINGLE_CACHE_DB_FILE_NAME: &str = "jingle_cache.db";

/// Platform config directory for the station client.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path of the station config file.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Path of the jingle cache database.
#[must_use]
pub fn jingle_cache_db_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(JINGLE_CACHE_DB_FILE_NAME)
}
