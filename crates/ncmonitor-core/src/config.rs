use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{NcMonitorError, Result};

pub const DEFAULT_FILE_PREFIX: &str = "ncmonitor";
pub const DEFAULT_FILE_SUFFIX: &str = ".txt";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Runtime settings for a monitor instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default)]
    pub pattern: FilePattern,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            pattern: FilePattern::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(NcMonitorError::Settings(format!(
                "poll interval must be between {}s and {}s, got {}s",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, self.poll_interval_secs
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(NcMonitorError::Settings(
                "request timeout must be at least 1s".to_string(),
            ));
        }
        if self.pattern.prefix.is_empty() && self.pattern.suffix.is_empty() {
            return Err(NcMonitorError::Settings(
                "config file prefix and suffix cannot both be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<prefix>*<suffix>` file name pattern, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePattern {
    pub prefix: String,
    pub suffix: String,
}

impl Default for FilePattern {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_PREFIX, DEFAULT_FILE_SUFFIX)
    }
}

impl FilePattern {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        let prefix = self.prefix.to_lowercase();
        let suffix = self.suffix.to_lowercase();

        name.len() >= prefix.len() + suffix.len()
            && name.starts_with(&prefix)
            && name.ends_with(&suffix)
    }

    /// File name with the suffix removed, used as the server name
    pub fn stem<'a>(&self, file_name: &'a str) -> &'a str {
        let cut = file_name.len().saturating_sub(self.suffix.len());
        file_name.get(..cut).unwrap_or(file_name)
    }
}

/// Why a config file was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected 2 non-empty lines (URL, token), found {0}")]
    WrongLineCount(usize),

    #[error("URL must start with http:// or https://, got '{0}'")]
    InvalidUrl(String),

    #[error("file could not be read: {0}")]
    Unreadable(String),

    #[error("server name '{0}' is already used by another config file")]
    DuplicateName(String),
}

/// One monitored server, built from a single config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub base_url: String,
    pub token: String,
    pub path: PathBuf,
}

impl ServerConfig {
    /// Parse the two-line config format: URL, then token.
    ///
    /// Blank lines and `#` comments are ignored before counting.
    pub fn parse(
        name: impl Into<String>,
        path: &Path,
        contents: &str,
    ) -> std::result::Result<Self, ConfigError> {
        let lines: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();

        let [url, token] = lines.as_slice() else {
            return Err(ConfigError::WrongLineCount(lines.len()));
        };

        let lower = url.to_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            name: name.into(),
            base_url: url.to_string(),
            token: token.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Host part of the base URL, without scheme or trailing slash
    pub fn host(&self) -> &str {
        let without_scheme = self
            .base_url
            .split_once("//")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        without_scheme.trim_end_matches('/')
    }

    pub fn display_label(&self) -> String {
        format!("[{}] {}", self.name, self.host())
    }

    pub fn masked_token(&self) -> String {
        let visible: String = self.token.chars().take(4).collect();
        if self.token.chars().count() <= 4 {
            "****".to_string()
        } else {
            format!("{}****", visible)
        }
    }
}
