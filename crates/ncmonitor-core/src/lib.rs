// Domain modules
pub mod config;
pub mod error;
pub mod format;
pub mod metrics;
pub mod serverinfo;
pub mod view;

pub use config::{
    ConfigError, FilePattern, MonitorSettings, ServerConfig, DEFAULT_FILE_PREFIX,
    DEFAULT_FILE_SUFFIX, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
};
pub use error::{NcMonitorError, Result};
pub use metrics::{
    now_ms, ActivityInfo, AppEntry, AppsInfo, DatabaseInfo, FailureKind, MetricsSnapshot,
    PhpInfo, PollResult, ServerState, ShareInfo, StorageInfo, SystemInfo,
};
pub use serverinfo::{endpoint_url, parse_serverinfo, ParseError, SERVERINFO_PATH};
pub use view::{display_snapshot, render_tab, status_line, MetricRow, Tab, TabContent};
