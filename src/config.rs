//! Configuration file handling for ptyrun.
//!
//! Optional TOML configuration is read from `~/.ptyrun/config.toml`. Every
//! knob can also be set on the command line, which always wins; the file
//! only supplies defaults for what the invocation leaves unspecified.
//!
//! ```toml
//! # Target program when --bin and PTYRUN_BIN are absent
//! bin = "claude"
//!
//! # Default wall-clock limit in seconds
//! timeout = 300.0
//!
//! # Strip escape sequences from relayed output
//! strip_ansi = true
//!
//! # Value for TERM when the environment does not define one
//! term = "xterm-256color"
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default TERM value handed to the child when the environment has none
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Fallback target program
pub const DEFAULT_BIN: &str = "claude";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target program when not given on the command line
    pub bin: Option<String>,
    /// Default timeout in seconds
    pub timeout: Option<f64>,
    /// Strip escape sequences from relayed output
    pub strip_ansi: Option<bool>,
    /// TERM value for the child when the environment has none
    pub term: Option<String>,
}

impl Config {
    /// Load configuration from the default path
    ///
    /// A missing or unreadable file is not an error; the wrapper has to work
    /// in environments that never created one.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Load configuration from a specific file, degrading to defaults
    pub fn load_from(path: &std::path::Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(config) = toml::from_str(&content) {
                return config;
            }
        }
        Self::default()
    }

    /// Config file path under the user's home directory
    fn config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".ptyrun").join("config.toml"))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.bin.is_none());
        assert!(config.timeout.is_none());
        assert!(config.strip_ansi.is_none());
        assert!(config.term.is_none());
    }

    #[test]
    fn test_parses_all_fields() {
        let config: Config = toml::from_str(
            r#"
            bin = "vi"
            timeout = 2.5
            strip_ansi = false
            term = "xterm"
            "#,
        )
        .unwrap();
        assert_eq!(config.bin.as_deref(), Some("vi"));
        assert_eq!(config.timeout, Some(2.5));
        assert_eq!(config.strip_ansi, Some(false));
        assert_eq!(config.term.as_deref(), Some("xterm"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let config: Config = toml::from_str("bin = \"vi\"\ncolor_scheme = \"nord\"").unwrap();
        assert_eq!(config.bin.as_deref(), Some("vi"));
    }

    #[test]
    fn test_load_from_missing_file_degrades_to_default() {
        let config = Config::load_from(std::path::Path::new("/nonexistent/ptyrun.toml"));
        assert!(config.bin.is_none());
    }

    #[test]
    fn test_load_from_broken_file_degrades_to_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bin = [this is not toml").unwrap();
        let config = Config::load_from(file.path());
        assert!(config.bin.is_none());
    }

    #[test]
    fn test_load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bin = \"htop\"\ntimeout = 12.0").unwrap();
        let config = Config::load_from(file.path());
        assert_eq!(config.bin.as_deref(), Some("htop"));
        assert_eq!(config.timeout, Some(12.0));
    }
}
