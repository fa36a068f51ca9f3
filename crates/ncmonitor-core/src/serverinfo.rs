//! Parsing of the serverinfo OCS response into a [`MetricsSnapshot`]

use serde_json::Value;
use thiserror::Error;

use crate::metrics::{
    ActivityInfo, AppEntry, AppsInfo, DatabaseInfo, MetricsSnapshot, PhpInfo, ShareInfo,
    StorageInfo, SystemInfo,
};

/// Path of the serverinfo endpoint relative to the server's base URL
pub const SERVERINFO_PATH: &str = "/ocs/v2.php/apps/serverinfo/api/v1/info?format=json";

/// The API reports memory and swap in KiB
const KIB: u64 = 1024;

/// OCS status codes that mean the token was not accepted
const OCS_UNAUTHORIZED_CODES: [u64; 2] = [401, 997];

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response has no ocs.data object")]
    MissingData,

    #[error("API reported status '{status}' (code {code:?}): {message}")]
    ApiStatus {
        status: String,
        code: Option<u64>,
        message: String,
    },
}

impl ParseError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::ApiStatus { code: Some(code), .. } if OCS_UNAUTHORIZED_CODES.contains(code)
        )
    }
}

pub fn endpoint_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), SERVERINFO_PATH)
}

pub fn parse_serverinfo(
    server_name: &str,
    fetched_at_ms: u64,
    body: &str,
) -> Result<MetricsSnapshot, ParseError> {
    let raw: Value = serde_json::from_str(body)?;
    snapshot_from_value(server_name, fetched_at_ms, raw)
}

/// Validate the OCS envelope and extract every known metric.
///
/// Only a broken envelope is an error. Individual metrics that are missing
/// or not numeric come back as `None`.
pub fn snapshot_from_value(
    server_name: &str,
    fetched_at_ms: u64,
    raw: Value,
) -> Result<MetricsSnapshot, ParseError> {
    check_meta(&raw)?;

    let data = raw.pointer("/ocs/data").filter(|d| d.is_object());
    let Some(data) = data else {
        return Err(ParseError::MissingData);
    };

    let system = data.pointer("/nextcloud/system");
    let storage = data.pointer("/nextcloud/storage");
    let shares = data.pointer("/nextcloud/shares");
    let php = data.pointer("/server/php");
    let database = data.pointer("/server/database");
    let active = data.get("activeUsers");

    let mem_total_kib = number_u64(field(system, "mem_total"));
    let mem_free_kib = number_u64(field(system, "mem_free"));
    let swap_total_kib = number_u64(field(system, "swap_total"));
    let swap_free_kib = number_u64(field(system, "swap_free"));

    let free_space = number_u64(field(system, "freespace"));
    let reported_used = number_u64(field(storage, "used"));
    let reported_free = number_u64(field(storage, "free"));
    let free_from_system = reported_used.is_none() && reported_free.is_none();
    let storage_free = if free_from_system {
        free_space
    } else {
        reported_free
    };
    let storage_total = match (reported_used, reported_free) {
        (Some(used), Some(free)) => used.checked_add(free),
        _ => None,
    };

    Ok(MetricsSnapshot {
        server_name: server_name.to_string(),
        fetched_at_ms,
        cpu_load: cpu_load(field(system, "cpuload")),
        mem_used: used_bytes(mem_total_kib, mem_free_kib),
        mem_total: kib_to_bytes(mem_total_kib),
        storage_used: reported_used,
        storage_total,
        active_users_last_hour: number_u64(field(active, "last1hour")),
        system: SystemInfo {
            version: text(field(system, "version")),
            cpu_count: number_u64(field(system, "cpunum")),
            swap_used: used_bytes(swap_total_kib, swap_free_kib),
            swap_total: kib_to_bytes(swap_total_kib),
            free_space,
            maintenance: flag(field(system, "maintenance")),
            failed_logins: number_u64(field(system, "failing_login_attempts")),
        },
        storage: StorageInfo {
            free: storage_free,
            free_from_system,
            num_users: number_u64(field(storage, "num_users")),
            num_files: number_u64(field(storage, "num_files")),
            num_storages: number_u64(field(storage, "num_storages")),
        },
        activity: ActivityInfo {
            last_5_minutes: number_u64(field(active, "last5minutes")),
            last_24_hours: number_u64(field(active, "last24hours")),
        },
        shares: ShareInfo {
            total: number_u64(field(shares, "num_shares")),
            user: number_u64(field(shares, "num_shares_user")),
            link: number_u64(field(shares, "num_shares_link")),
            federated_sent: number_u64(field(shares, "num_fed_shares_sent")),
        },
        php: PhpInfo {
            version: text(field(php, "version")),
            memory_limit: number_u64(field(php, "memory_limit")),
            max_execution_time: number_u64(field(php, "max_execution_time")),
            opcache_hit_rate: number_f64(
                php.and_then(|p| p.pointer("/opcache/opcache_statistics/opcache_hit_rate")),
            ),
            opcache_used_memory: number_u64(
                php.and_then(|p| p.pointer("/opcache/memory_usage/used_memory")),
            ),
            opcache_wasted_memory: number_u64(
                php.and_then(|p| p.pointer("/opcache/memory_usage/wasted_memory")),
            ),
            opcache_start_time: number_u64(
                php.and_then(|p| p.pointer("/opcache/opcache_statistics/start_time")),
            ),
        },
        database: DatabaseInfo {
            kind: text(field(database, "type")),
            host: text(field(database, "host")),
            version: text(field(database, "version")),
            size: number_u64(field(database, "size")),
        },
        webserver: text(data.pointer("/server/webserver")),
        apps: apps(data),
        raw,
    })
}

fn check_meta(raw: &Value) -> Result<(), ParseError> {
    let meta = raw.pointer("/ocs/meta");
    let status = field(meta, "status").and_then(Value::as_str);
    if status == Some("ok") {
        return Ok(());
    }

    Err(ParseError::ApiStatus {
        status: status.unwrap_or("missing").to_string(),
        code: number_u64(field(meta, "statuscode")),
        message: text(field(meta, "message")).unwrap_or_else(|| "Unknown error".to_string()),
    })
}

fn field<'a>(object: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    object.and_then(|o| o.get(key))
}

/// Accepts JSON numbers and numeric strings such as `"123.0"`
fn number_f64(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn number_u64(value: Option<&Value>) -> Option<u64> {
    if let Some(n) = value.and_then(Value::as_u64) {
        return Some(n);
    }
    number_f64(value)
        .filter(|n| *n >= 0.0 && *n <= u64::MAX as f64)
        .map(|n| n as u64)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn cpu_load(value: Option<&Value>) -> [Option<f64>; 3] {
    let loads = value.and_then(Value::as_array);
    std::array::from_fn(|i| number_f64(loads.and_then(|l| l.get(i))))
}

fn kib_to_bytes(kib: Option<u64>) -> Option<u64> {
    kib.and_then(|k| k.checked_mul(KIB))
}

fn used_bytes(total_kib: Option<u64>, free_kib: Option<u64>) -> Option<u64> {
    let (total, free) = (total_kib?, free_kib?);
    kib_to_bytes(Some(total.saturating_sub(free)))
}

fn apps(data: &Value) -> AppsInfo {
    let app = data.get("app").filter(|a| a.is_object());

    let enabled = field(app, "enabled").and_then(|enabled| {
        let mut entries: Vec<AppEntry> = match enabled {
            Value::Array(items) => items.iter().filter_map(app_entry).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(id, version)| AppEntry {
                    id: id.clone(),
                    version: text(Some(version)),
                })
                .collect(),
            _ => return None,
        };
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Some(entries)
    });

    let installed_count = match field(app, "installed") {
        Some(Value::Array(items)) => Some(items.len() as u64),
        Some(Value::Object(map)) => Some(map.len() as u64),
        _ => number_u64(data.pointer("/nextcloud/system/apps/num_installed")),
    };

    AppsInfo {
        enabled,
        installed_count,
    }
}

fn app_entry(item: &Value) -> Option<AppEntry> {
    match item {
        Value::String(id) => Some(AppEntry {
            id: id.clone(),
            version: None,
        }),
        Value::Object(_) => Some(AppEntry {
            id: text(item.get("id")).unwrap_or_else(|| "Unknown App".to_string()),
            version: text(item.get("version")),
        }),
        _ => None,
    }
}
