//! Default paths for rentald components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/rentald/rentald.sock` or `/tmp/rentald-$USER/rentald.sock`
//! - Data: `$XDG_DATA_HOME/rentald` or `~/.local/share/rentald`
//! - Config: `$XDG_CONFIG_HOME/rentald/config.toml` or `~/.config/rentald/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const RENTAL_SOCKET_ENV: &str = "RENTAL_SOCKET";

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "rentald.sock";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Application subdirectory name
const APP_DIR: &str = "rentald";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$RENTAL_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/rentald/rentald.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/rentald-$USER/rentald.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(RENTAL_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking RENTAL_SOCKET env var.
/// Used for default values in configs where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Default data directory. `RENTAL_DATA_DIR` is applied by the daemon's CLI.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
///
/// 1. `$XDG_CONFIG_HOME/rentald/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/rentald/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_rentald() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("rentald"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_contains_rentald() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("rentald"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("rentald"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
