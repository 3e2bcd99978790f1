//! Environment constants and path utilities for sessionwarden.
//!
//! This module centralizes the names, defaults and path rules used throughout
//! the crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".sessionwarden";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "sessionwarden.toml";

/// Environment variable that points at an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "SESSIONWARDEN_CONFIG";

/// Session defaults and reserved names
pub mod session {
    /// Default name of the cookie carrying the identifier
    pub const DEFAULT_COOKIE_NAME: &str = "ci_session";

    /// Default inactivity lifetime in seconds before gc may purge a record
    pub const DEFAULT_EXPIRATION_SECS: u64 = 7200;

    /// Default regeneration interval in seconds
    pub const DEFAULT_TIME_TO_UPDATE_SECS: u64 = 300;

    /// Default TTL applied by temp data setters in seconds
    pub const DEFAULT_TEMP_TTL_SECS: i64 = 300;

    /// Number of random bytes behind an identifier (160 bits)
    pub const ID_BYTES: usize = 20;

    /// Attempts made to allocate an unused identifier before giving up
    pub const MAX_ID_ATTEMPTS: u32 = 5;

    /// Accepted shape of an inbound identifier
    pub const ID_PATTERN: &str = "^[0-9a-f]{40}$";

    /// Default save directory name under the system temp directory
    pub const DEFAULT_SAVE_DIR_NAME: &str = "sessionwarden";

    /// Extension used by in-flight file handler writes
    pub const PARTIAL_FILE_EXTENSION: &str = "partial";

    /// Extension of the per-record advisory lock files
    pub const LOCK_FILE_EXTENSION: &str = "lock";

    /// Poll interval while another process holds a record lock
    pub const LOCK_POLL_INTERVAL_MS: u64 = 25;

    /// How long `open` waits for a record lock before giving up
    pub const LOCK_WAIT_TIMEOUT_SECS: u64 = 30;

    /// Upper bound for any configured or caller-supplied lifetime (100 years)
    pub const MAX_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;
}

/// Test-related constants
pub mod test {
    /// Address used by request fixtures
    pub const TEST_IP_ADDRESS: &str = "127.0.0.1";

    /// User agent used by request fixtures
    pub const TEST_USER_AGENT: &str = "sessionwarden-test/1.0";
}

/// Default directory the file handler writes to
pub fn default_save_path() -> PathBuf {
    std::env::temp_dir().join(session::DEFAULT_SAVE_DIR_NAME)
}

/// Build the file path of one session record
pub fn session_file_path(save_path: &Path, cookie_name: &str, session_id: &str) -> PathBuf {
    save_path.join(format!("{}{}", cookie_name, session_id))
}

/// Advisory lock file guarding one record; hidden so it never parses as a record
pub fn session_lock_path(save_path: &Path, cookie_name: &str, session_id: &str) -> PathBuf {
    save_path.join(format!(
        ".{}{}.{}",
        cookie_name,
        session_id,
        session::LOCK_FILE_EXTENSION
    ))
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(APP_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_file_path() {
        let save_path = Path::new("/var/lib/sessions");

        assert_eq!(
            session_file_path(save_path, "ci_session", "abc123"),
            Path::new("/var/lib/sessions/ci_sessionabc123")
        );
        assert_eq!(
            session_lock_path(save_path, "ci_session", "abc123"),
            Path::new("/var/lib/sessions/.ci_sessionabc123.lock")
        );
    }

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.sessionwarden/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/sessionwarden.toml")
        );
    }
}
