use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ncmonitor_core::{ConfigError, FilePattern, ServerConfig};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoaderError {
    #[error("Cannot read config directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A config file that matched the pattern but was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: ConfigError,
}

/// Result of scanning a directory for server config files
#[derive(Debug, Clone, Default)]
pub struct ConfigScan {
    /// Valid servers in directory enumeration order
    pub servers: Vec<ServerConfig>,
    pub skipped: Vec<SkippedFile>,
}

impl ConfigScan {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}

pub fn load_server_config(path: &Path, pattern: &FilePattern) -> Result<ServerConfig, ConfigError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable(e.to_string()))?;
    ServerConfig::parse(pattern.stem(&file_name), path, &contents)
}

/// Scan `dir` for files matching `pattern` and load each one.
///
/// Malformed files are logged and collected in [`ConfigScan::skipped`];
/// only an unreadable directory is an error.
#[instrument(skip(pattern), fields(dir = %dir.display()))]
pub fn load_server_configs(
    dir: &Path,
    pattern: &FilePattern,
) -> Result<ConfigScan, ConfigLoaderError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigLoaderError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut scan = ConfigScan::default();
    let mut seen = HashSet::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();

        if !pattern.matches(&file_name) || !path.is_file() {
            continue;
        }

        match load_server_config(&path, pattern) {
            Ok(server) if !seen.insert(server.name.clone()) => {
                warn!("Skipping {}: duplicate server name '{}'", path.display(), server.name);
                scan.skipped.push(SkippedFile {
                    path,
                    reason: ConfigError::DuplicateName(server.name),
                });
            }
            Ok(server) => {
                debug!("Loaded server '{}' from {}", server.name, path.display());
                scan.servers.push(server);
            }
            Err(reason) => {
                warn!("Skipping invalid config file {}: {}", path.display(), reason);
                scan.skipped.push(SkippedFile { path, reason });
            }
        }
    }

    info!(
        servers = scan.servers.len(),
        skipped = scan.skipped.len(),
        "Config scan complete"
    );
    Ok(scan)
}
