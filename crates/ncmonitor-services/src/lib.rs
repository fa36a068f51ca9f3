mod client;
mod config_loader;
mod scheduler;
mod services;
mod store;

pub use client::{MetricsClient, TOKEN_HEADER};
pub use config_loader::{
    load_server_config, load_server_configs, ConfigLoaderError, ConfigScan, SkippedFile,
};
pub use scheduler::{CycleSummary, PollEvent, PollScheduler, SchedulerHandle};
pub use services::Services;
pub use store::SnapshotStore;

// Re-export core types for the binary (it should only import from services)
pub use ncmonitor_core::{
    // Settings and server configs
    ConfigError, FilePattern, MonitorSettings, NcMonitorError, ServerConfig,
    DEFAULT_FILE_PREFIX, DEFAULT_FILE_SUFFIX, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
    // Poll results
    FailureKind, MetricsSnapshot, PollResult, ServerState,
    // Rendering
    display_snapshot, now_ms, render_tab, status_line, MetricRow, Tab, TabContent,
};
pub use ncmonitor_core::{format, view};
