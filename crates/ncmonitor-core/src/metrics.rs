//! Metrics snapshot and poll result types

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Metrics extracted from one successful serverinfo response.
///
/// Every extracted value is optional: a field the server did not report, or
/// reported in an unusable form, is `None` rather than a made-up zero.
/// Memory and storage values are in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub server_name: String,
    pub fetched_at_ms: u64,
    /// 1, 5 and 15 minute load averages
    pub cpu_load: [Option<f64>; 3],
    pub mem_used: Option<u64>,
    pub mem_total: Option<u64>,
    pub storage_used: Option<u64>,
    pub storage_total: Option<u64>,
    pub active_users_last_hour: Option<u64>,
    pub system: SystemInfo,
    pub storage: StorageInfo,
    pub activity: ActivityInfo,
    pub shares: ShareInfo,
    pub php: PhpInfo,
    pub database: DatabaseInfo,
    pub webserver: Option<String>,
    pub apps: AppsInfo,
    /// Full response document
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: Option<String>,
    pub cpu_count: Option<u64>,
    pub swap_used: Option<u64>,
    pub swap_total: Option<u64>,
    pub free_space: Option<u64>,
    pub maintenance: Option<bool>,
    pub failed_logins: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub free: Option<u64>,
    /// `free` came from the system free space because the storage block
    /// reported neither used nor free bytes
    pub free_from_system: bool,
    pub num_users: Option<u64>,
    pub num_files: Option<u64>,
    pub num_storages: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub last_5_minutes: Option<u64>,
    pub last_24_hours: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub total: Option<u64>,
    pub user: Option<u64>,
    pub link: Option<u64>,
    pub federated_sent: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhpInfo {
    pub version: Option<String>,
    pub memory_limit: Option<u64>,
    pub max_execution_time: Option<u64>,
    pub opcache_hit_rate: Option<f64>,
    pub opcache_used_memory: Option<u64>,
    pub opcache_wasted_memory: Option<u64>,
    /// Unix seconds when OPcache (and so PHP-FPM) last started
    pub opcache_start_time: Option<u64>,
}

impl PhpInfo {
    /// PHP uptime relative to `now_secs`, if the start time is known and in the past
    pub fn uptime_secs(&self, now_secs: u64) -> Option<u64> {
        self.opcache_start_time
            .filter(|start| *start > 0 && *start < now_secs)
            .map(|start| now_secs - start)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub kind: Option<String>,
    pub host: Option<String>,
    pub version: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppsInfo {
    /// Sorted by id; `None` when the response carried no app list
    pub enabled: Option<Vec<AppEntry>>,
    pub installed_count: Option<u64>,
}

/// Categorised reason a poll failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NetworkUnreachable,
    AuthRejected,
    ResponseUnparseable,
    Timeout,
    /// Non-2xx status other than 401/403
    UnexpectedStatus(u16),
    /// The OCS envelope reported a failure
    ApiStatus,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable => "network unreachable",
            Self::AuthRejected => "authentication rejected",
            Self::ResponseUnparseable => "unparseable response",
            Self::Timeout => "timed out",
            Self::UnexpectedStatus(_) => "unexpected HTTP status",
            Self::ApiStatus => "API error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedStatus(code) => write!(f, "{} {}", self.label(), code),
            _ => f.write_str(self.label()),
        }
    }
}

/// Outcome of one fetch against one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollResult {
    Ok(MetricsSnapshot),
    Failed {
        kind: FailureKind,
        message: String,
        failed_at_ms: u64,
    },
}

impl PollResult {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
            failed_at_ms: now_ms(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn snapshot(&self) -> Option<&MetricsSnapshot> {
        match self {
            Self::Ok(snapshot) => Some(snapshot),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Ok(_) => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }

    /// When this result was produced
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Ok(snapshot) => snapshot.fetched_at_ms,
            Self::Failed { failed_at_ms, .. } => *failed_at_ms,
        }
    }
}

/// Store entry for one server
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Most recent poll result, success or failure
    pub latest: PollResult,
    /// Most recent successful snapshot; carries its own fetch time
    pub last_success: Option<Arc<MetricsSnapshot>>,
    pub consecutive_failures: u32,
}

impl ServerState {
    pub fn new(result: PollResult) -> Self {
        Self::advance(None, result)
    }

    /// State after recording `result` on top of `previous`
    pub fn advance(previous: Option<&ServerState>, result: PollResult) -> Self {
        let (last_success, consecutive_failures) = match &result {
            PollResult::Ok(snapshot) => (Some(Arc::new(snapshot.clone())), 0),
            PollResult::Failed { .. } => (
                previous.and_then(|p| p.last_success.clone()),
                previous.map_or(0, |p| p.consecutive_failures) + 1,
            ),
        };

        Self {
            latest: result,
            last_success,
            consecutive_failures,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.latest.is_ok()
    }

    /// Age of the last successful snapshot at `now_ms`
    pub fn success_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_success
            .as_ref()
            .map(|s| now_ms.saturating_sub(s.fetched_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, fetched_at_ms: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            server_name: name.to_string(),
            fetched_at_ms,
            cpu_load: [Some(0.5), None, None],
            mem_used: Some(1024),
            mem_total: Some(4096),
            storage_used: None,
            storage_total: None,
            active_users_last_hour: Some(3),
            system: SystemInfo::default(),
            storage: StorageInfo::default(),
            activity: ActivityInfo::default(),
            shares: ShareInfo::default(),
            php: PhpInfo::default(),
            database: DatabaseInfo::default(),
            webserver: None,
            apps: AppsInfo::default(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_failure_keeps_last_success() {
        let ok = ServerState::new(PollResult::Ok(snapshot("a", 1_000)));
        assert!(ok.is_connected());
        assert_eq!(ok.consecutive_failures, 0);

        let failed = ServerState::advance(
            Some(&ok),
            PollResult::failed(FailureKind::Timeout, "slow"),
        );
        assert!(!failed.is_connected());
        assert_eq!(failed.consecutive_failures, 1);
        assert_eq!(failed.last_success.as_ref().unwrap().fetched_at_ms, 1_000);
        assert_eq!(failed.success_age_ms(4_000), Some(3_000));

        let failed_again = ServerState::advance(
            Some(&failed),
            PollResult::failed(FailureKind::NetworkUnreachable, "down"),
        );
        assert_eq!(failed_again.consecutive_failures, 2);

        let recovered = ServerState::advance(
            Some(&failed_again),
            PollResult::Ok(snapshot("a", 9_000)),
        );
        assert_eq!(recovered.consecutive_failures, 0);
        assert_eq!(recovered.success_age_ms(9_500), Some(500));
    }

    #[test]
    fn test_failure_without_history() {
        let state = ServerState::new(PollResult::failed(FailureKind::AuthRejected, "401"));
        assert!(state.last_success.is_none());
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.latest.failure_kind(), Some(FailureKind::AuthRejected));
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Timeout.to_string(), "timed out");
        assert_eq!(
            FailureKind::UnexpectedStatus(503).to_string(),
            "unexpected HTTP status 503"
        );
    }

    #[test]
    fn test_php_uptime() {
        let php = PhpInfo {
            opcache_start_time: Some(1_000),
            ..Default::default()
        };
        assert_eq!(php.uptime_secs(4_600), Some(3_600));
        assert_eq!(php.uptime_secs(500), None);
        assert_eq!(PhpInfo::default().uptime_secs(4_600), None);
    }

    #[test]
    fn test_poll_result_serializes_with_status_tag() {
        let failed = PollResult::Failed {
            kind: FailureKind::AuthRejected,
            message: "nope".to_string(),
            failed_at_ms: 42,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "auth_rejected");
        assert_eq!(json["failed_at_ms"], 42);
    }
}
