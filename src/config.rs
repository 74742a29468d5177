//! Configuration for roamterm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.roamterm/config.toml`
//! - Prefix key parsing for local key bindings
//! - The `~/.roamterm` directory shared with the log file and token store
//!
//! # Configuration File
//!
//! ```toml
//! # REST API base URL; the terminal socket uses ws:// or wss:// accordingly
//! api_url = "https://api.roamingproxy.com"
//!
//! # Web panel, used for "configure server" hints
//! panel_url = "https://roamingproxy.com"
//!
//! terminal_path = "/v2/terminal/ws"
//! servers_path = "/v2/servers"
//!
//! # Ctrl+<key> prefix for local bindings
//! prefix_key = "b"
//!
//! [terminal]
//! sync_size_on_open = false
//! set_title = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::bridge::protocol::DEFAULT_TERMINAL_PATH;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid prefix key '{0}' (expected a single letter)")]
    PrefixKey(String),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API base URL
    pub api_url: String,
    /// Web panel base URL
    pub panel_url: String,
    /// Terminal endpoint path below the API URL
    pub terminal_path: String,
    /// Server lookup path below the API URL
    pub servers_path: String,
    /// Prefix key letter (used with Ctrl)
    pub prefix_key: String,
    /// Terminal behaviour
    pub terminal: TerminalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            panel_url: "http://localhost:5173".to_string(),
            terminal_path: DEFAULT_TERMINAL_PATH.to_string(),
            servers_path: "/v2/servers".to_string(),
            prefix_key: "b".to_string(),
            terminal: TerminalConfig::default(),
        }
    }
}

/// Terminal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Send the local size right after the socket opens
    pub sync_size_on_open: bool,
    /// Reflect the connection state in the window title
    pub set_title: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            sync_size_on_open: false,
            set_title: true,
        }
    }
}

/// Prefix key for local bindings (Ctrl+<char>)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixKey {
    pub char: char,
}

impl Default for PrefixKey {
    fn default() -> Self {
        Self { char: 'b' }
    }
}

impl PrefixKey {
    /// Parse "b", "ctrl-b", "C-b" or "^b"
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let lower = s.trim().to_lowercase();
        let key = lower
            .strip_prefix("ctrl-")
            .or_else(|| lower.strip_prefix("ctrl+"))
            .or_else(|| lower.strip_prefix("c-"))
            .or_else(|| lower.strip_prefix('^'))
            .unwrap_or(&lower);

        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_lowercase() => Ok(Self { char: c }),
            _ => Err(ConfigError::PrefixKey(s.to_string())),
        }
    }

    /// The control byte the prefix produces, sent when it is pressed twice
    pub fn byte(&self) -> u8 {
        self.char as u8 - b'a' + 1
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults if it is missing or broken
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.api_url)
    }

    pub fn panel_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.panel_url)
    }

    pub fn prefix(&self) -> PrefixKey {
        PrefixKey::parse(&self.prefix_key).unwrap_or_else(|e| {
            warn!("{}; using Ctrl+B", e);
            PrefixKey::default()
        })
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|source| ConfigError::Url {
        url: url.to_string(),
        source,
    })
}

/// `~/.roamterm`, created on first use
pub fn config_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".roamterm");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_url = "https://api.example.com"

            [terminal]
            sync_size_on_open = true
            "#,
        )
        .unwrap();

        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.terminal_path, "/v2/terminal/ws");
        assert!(config.terminal.sync_size_on_open);
        assert!(config.terminal.set_title);
        assert_eq!(config.api_url().unwrap().scheme(), "https");
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!("roamterm-config-{}.toml", std::process::id()));
        fs::write(&path, "api_url = [").unwrap();
        let result = Config::load_from(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_prefix_key_parse() {
        assert_eq!(PrefixKey::parse("b").unwrap().char, 'b');
        assert_eq!(PrefixKey::parse("Ctrl-A").unwrap().char, 'a');
        assert_eq!(PrefixKey::parse("C-x").unwrap().char, 'x');
        assert_eq!(PrefixKey::parse("^q").unwrap().char, 'q');
        assert!(PrefixKey::parse("ctrl-").is_err());
        assert!(PrefixKey::parse("ab").is_err());
        assert!(PrefixKey::parse("1").is_err());

        assert_eq!(PrefixKey::default().byte(), 0x02);
    }

    #[test]
    fn test_bad_prefix_falls_back() {
        let config = Config {
            prefix_key: "??".to_string(),
            ..Config::default()
        };
        assert_eq!(config.prefix(), PrefixKey::default());
    }
}
