//! Formatting helpers for human-readable byte sizes, rates and durations.

use std::time::Duration;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a transfer rate in bytes per second (e.g. "2.38 MB/s").
///
/// Unit thresholds are strict: exactly 1024 B/s stays in B/s.
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec > KB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else {
        format!("{bytes_per_sec:.2} B/s")
    }
}

/// Formats a duration as a human-readable string (e.g. "5.0s", "1m 05s", "1h 01m 05s").
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!(
            "{}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}
