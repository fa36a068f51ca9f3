//! Human-readable formatting for metric values

use chrono::{DateTime, Local};

pub const UNKNOWN: &str = "N/A";

const BYTE_UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

const UPTIME_UNITS: [(&str, u64); 4] = [
    ("year", 31_536_000),
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
];

/// Binary byte size with two decimals, e.g. `1.50 GB`
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, BYTE_UNITS[unit])
}

/// Up to three components, largest first: `2 days, 3 hours, 1 minute`
pub fn format_uptime(seconds: u64) -> String {
    if seconds == 0 {
        return "N/A or Fresh Start".to_string();
    }

    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (name, unit_secs) in UPTIME_UNITS {
        let value = remaining / unit_secs;
        if value > 0 {
            remaining -= value * unit_secs;
            parts.push(plural(value, name));
        }
    }

    if parts.is_empty() {
        return plural(seconds, "second");
    }

    parts.truncate(3);
    parts.join(", ")
}

fn plural(value: u64, name: &str) -> String {
    if value == 1 {
        format!("{} {}", value, name)
    } else {
        format!("{} {}s", value, name)
    }
}

/// Thousands separators: `184,523`
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_load(load: f64) -> String {
    format!("{:.2}", load)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Elapsed time in its two most significant units: `45s`, `3m 5s`, `2h 4m`
pub fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3_599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60),
    }
}

fn local_time(ms: u64) -> Option<DateTime<Local>> {
    let ms = i64::try_from(ms).ok()?;
    DateTime::from_timestamp_millis(ms).map(|t| t.with_timezone(&Local))
}

/// Local date and time, `YYYY-MM-DD HH:MM:SS`
pub fn format_timestamp(ms: u64) -> String {
    local_time(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Local time of day, `HH:MM:SS`
pub fn format_clock(ms: u64) -> String {
    local_time(ms)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Formats a known value, or [`UNKNOWN`]
pub fn or_unknown<T>(value: Option<T>, format: impl FnOnce(T) -> String) -> String {
    value.map(format).unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512.00 Bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(8_048_200 * 1024), "7.68 GB");
        assert_eq!(format_bytes(u64::MAX), "16.00 EB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "N/A or Fresh Start");
        assert_eq!(format_uptime(1), "1 second");
        assert_eq!(format_uptime(45), "45 seconds");
        assert_eq!(format_uptime(60), "1 minute");
        assert_eq!(format_uptime(3_600 + 120), "1 hour, 2 minutes");
        assert_eq!(format_uptime(2 * 86_400 + 3 * 3_600 + 60 + 5), "2 days, 3 hours, 1 minute");
        assert_eq!(
            format_uptime(31_536_000 + 86_400 + 3_600 + 60),
            "1 year, 1 day, 1 hour"
        );
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(184_523), "184,523");
        assert_eq!(format_count(12_345_678), "12,345,678");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(900), "0s");
        assert_eq!(format_age(45_000), "45s");
        assert_eq!(format_age(185_000), "3m 5s");
        assert_eq!(format_age(7_440_000), "2h 4m");
    }

    #[test]
    fn test_small_formatters() {
        assert_eq!(format_load(0.5), "0.50");
        assert_eq!(format_percent(99.523), "99.52%");
        assert_eq!(or_unknown(None::<u64>, format_count), "N/A");
        assert_eq!(or_unknown(Some(1_000u64), format_count), "1,000");
    }

    #[test]
    fn test_format_timestamp_shape() {
        let formatted = format_timestamp(1_700_000_000_000);
        assert_eq!(formatted.len(), "2023-11-14 22:13:20".len());
        assert_eq!(format_clock(1_700_000_000_000).len(), "22:13:20".len());
    }
}
