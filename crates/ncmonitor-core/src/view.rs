//! Read-only dashboard view over a server's store entry.
//!
//! Everything here is a pure function of a [`ServerState`] (plus the current
//! time), so any front end can call it on every refresh without owning state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::format::{
    format_age, format_bytes, format_clock, format_count, format_load, format_percent,
    format_timestamp, format_uptime, or_unknown, UNKNOWN,
};
use crate::metrics::{MetricsSnapshot, PollResult, ServerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    CoreMetrics,
    SystemHealth,
    ActivitySecurity,
    Storage,
    SystemConfig,
    RawData,
}

impl Tab {
    pub const ALL: [Tab; 6] = [
        Tab::CoreMetrics,
        Tab::SystemHealth,
        Tab::ActivitySecurity,
        Tab::Storage,
        Tab::SystemConfig,
        Tab::RawData,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Tab::CoreMetrics => "Core Metrics",
            Tab::SystemHealth => "System Health",
            Tab::ActivitySecurity => "Activity & Security",
            Tab::Storage => "Storage",
            Tab::SystemConfig => "System Config",
            Tab::RawData => "Raw Data",
        }
    }

    /// Short name used on the command line
    pub fn key(&self) -> &'static str {
        match self {
            Tab::CoreMetrics => "core",
            Tab::SystemHealth => "health",
            Tab::ActivitySecurity => "activity",
            Tab::Storage => "storage",
            Tab::SystemConfig => "config",
            Tab::RawData => "raw",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Tab::ALL
            .into_iter()
            .find(|tab| tab.key() == wanted)
            .ok_or_else(|| {
                let keys: Vec<&str> = Tab::ALL.iter().map(Tab::key).collect();
                format!("unknown tab '{}', expected one of: {}", s, keys.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRow {
    pub label: String,
    pub value: String,
}

impl MetricRow {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabContent {
    Rows(Vec<MetricRow>),
    Text(String),
}

/// Render one tab of a snapshot
pub fn render_tab(tab: Tab, snapshot: &MetricsSnapshot, now_ms: u64) -> TabContent {
    match tab {
        Tab::CoreMetrics => TabContent::Rows(core_rows(snapshot, now_ms)),
        Tab::SystemHealth => TabContent::Rows(health_rows(snapshot)),
        Tab::ActivitySecurity => TabContent::Rows(activity_rows(snapshot)),
        Tab::Storage => TabContent::Rows(storage_rows(snapshot)),
        Tab::SystemConfig => TabContent::Rows(config_rows(snapshot)),
        Tab::RawData => TabContent::Text(raw_json(snapshot)),
    }
}

/// The snapshot a display should show for this state: the latest one if the
/// last poll succeeded, otherwise the last known good one
pub fn display_snapshot(state: &ServerState) -> Option<&MetricsSnapshot> {
    state
        .latest
        .snapshot()
        .or_else(|| state.last_success.as_deref())
}

fn count(value: Option<u64>) -> String {
    or_unknown(value, format_count)
}

fn bytes(value: Option<u64>) -> String {
    or_unknown(value, format_bytes)
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| UNKNOWN.to_string())
}

fn yes_no(value: Option<bool>) -> String {
    or_unknown(value, |b| (if b { "Yes" } else { "No" }).to_string())
}

fn core_rows(s: &MetricsSnapshot, now_ms: u64) -> Vec<MetricRow> {
    let uptime = s.php.uptime_secs(now_ms / 1000).unwrap_or(0);
    vec![
        MetricRow::new("Nextcloud Version", text(&s.system.version)),
        MetricRow::new("PHP Uptime", format_uptime(uptime)),
        MetricRow::new("Total Users", count(s.storage.num_users)),
        MetricRow::new("Total Files", count(s.storage.num_files)),
        MetricRow::new("Web Server", text(&s.webserver)),
        MetricRow::new("CPU Cores", count(s.system.cpu_count)),
    ]
}

fn health_rows(s: &MetricsSnapshot) -> Vec<MetricRow> {
    let [load_1, load_5, load_15] = s.cpu_load;
    vec![
        MetricRow::new("RAM Used", bytes(s.mem_used)),
        MetricRow::new("RAM Total", bytes(s.mem_total)),
        MetricRow::new("Swap Used", bytes(s.system.swap_used)),
        MetricRow::new("Swap Total", bytes(s.system.swap_total)),
        MetricRow::new("CPU Load (1m)", or_unknown(load_1, format_load)),
        MetricRow::new("CPU Load (5m)", or_unknown(load_5, format_load)),
        MetricRow::new("CPU Load (15m)", or_unknown(load_15, format_load)),
        MetricRow::new(
            "OPcache Hit Rate",
            or_unknown(s.php.opcache_hit_rate, format_percent),
        ),
        MetricRow::new("OPcache Used", bytes(s.php.opcache_used_memory)),
        MetricRow::new("OPcache Wasted", bytes(s.php.opcache_wasted_memory)),
    ]
}

fn activity_rows(s: &MetricsSnapshot) -> Vec<MetricRow> {
    vec![
        MetricRow::new("Active (5 min)", count(s.activity.last_5_minutes)),
        MetricRow::new("Active (1 hour)", count(s.active_users_last_hour)),
        MetricRow::new("Active (24 hours)", count(s.activity.last_24_hours)),
        MetricRow::new("Maintenance Mode", yes_no(s.system.maintenance)),
        MetricRow::new("Failed Logins", count(s.system.failed_logins)),
        MetricRow::new("Total Shares", count(s.shares.total)),
        MetricRow::new("User Shares", count(s.shares.user)),
        MetricRow::new("Federated Shares Sent", count(s.shares.federated_sent)),
        MetricRow::new("Public Link Shares", count(s.shares.link)),
    ]
}

fn storage_rows(s: &MetricsSnapshot) -> Vec<MetricRow> {
    let (used, free) = if s.storage.free_from_system {
        (
            "0 Bytes (Data Missing)".to_string(),
            or_unknown(s.storage.free, |b| {
                format!("{} (System Freespace)", format_bytes(b))
            }),
        )
    } else {
        (bytes(s.storage_used), bytes(s.storage.free))
    };

    vec![
        MetricRow::new("Storage Used", used),
        MetricRow::new("Storage Free", free),
        MetricRow::new("Storage Total", bytes(s.storage_total)),
        MetricRow::new("Database Size", bytes(s.database.size)),
        MetricRow::new(
            "Enabled Apps",
            or_unknown(s.apps.enabled.as_ref(), |apps| apps.len().to_string()),
        ),
        MetricRow::new("Installed Apps", count(s.apps.installed_count)),
    ]
}

fn config_rows(s: &MetricsSnapshot) -> Vec<MetricRow> {
    let mut rows = vec![
        MetricRow::new("PHP Version", text(&s.php.version)),
        MetricRow::new("PHP Memory Limit", bytes(s.php.memory_limit)),
        MetricRow::new(
            "PHP Max Execution",
            or_unknown(s.php.max_execution_time, |secs| format!("{}s", secs)),
        ),
        MetricRow::new("Database Type", text(&s.database.kind)),
        MetricRow::new("Database Host", text(&s.database.host)),
        MetricRow::new("Database Version", text(&s.database.version)),
    ];

    match &s.apps.enabled {
        Some(apps) => rows.extend(apps.iter().map(|app| {
            let version = app.version.as_deref().unwrap_or(UNKNOWN);
            MetricRow::new(format!("App: {}", app.id), format!("v{}", version))
        })),
        None => rows.push(MetricRow::new("Enabled Apps", "App data missing from response")),
    }

    rows
}

pub fn raw_json(snapshot: &MetricsSnapshot) -> String {
    serde_json::to_string_pretty(&snapshot.raw).unwrap_or_else(|e| format!("<{}>", e))
}

/// One-line status for a server, always carrying the time of the data shown
pub fn status_line(state: &ServerState, interval: Duration, now_ms: u64) -> String {
    let next_check = format_clock(state.latest.timestamp_ms() + interval.as_millis() as u64);

    match &state.latest {
        PollResult::Ok(snapshot) => format!(
            "Last updated: {}. Next check at {} ({}s interval).",
            format_timestamp(snapshot.fetched_at_ms),
            next_check,
            interval.as_secs()
        ),
        PollResult::Failed {
            kind,
            message,
            failed_at_ms,
        } => {
            let mut line = format!(
                "Error at {} ({}): {}. Next check at {}.",
                format_clock(*failed_at_ms),
                kind,
                message,
                next_check
            );
            if let Some(last) = &state.last_success {
                line.push_str(&format!(
                    " Showing data from {} ({} old).",
                    format_timestamp(last.fetched_at_ms),
                    format_age(now_ms.saturating_sub(last.fetched_at_ms))
                ));
            }
            if state.consecutive_failures > 1 {
                line.push_str(&format!(
                    " {} consecutive failures.",
                    state.consecutive_failures
                ));
            }
            line
        }
    }
}
