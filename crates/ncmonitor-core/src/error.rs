use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum NcMonitorError {
    #[error("Malformed config file {}: {reason}", path.display())]
    ConfigMalformed { path: PathBuf, reason: ConfigError },

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NcMonitorError>;
