//! Output formatting utilities

use autoscaler_lib::models::StatusLine;
use chrono::{DateTime, Local, Utc};
use colored::Colorize;

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Wall-clock time of a status line in local time
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(ts) => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Format a byte rate as KB/s
pub fn format_kb_rate(bytes_per_sec: f64) -> String {
    format!("{:.3} KB/s", bytes_per_sec / 1024.0)
}

/// Pick a column of a status line; `None` selects the last one
pub fn select_column(line: &StatusLine, column: Option<usize>) -> Option<f64> {
    match column {
        Some(index) => line.values.get(index).copied(),
        None => line.last_value(),
    }
}

/// One `watch` row: local time and the selected column in KB/s
pub fn format_watch_row(line: &StatusLine, column: Option<usize>) -> String {
    let value = match select_column(line, column) {
        Some(value) => format_kb_rate(value).cyan().to_string(),
        None => "-".dimmed().to_string(),
    };
    format!("{}  {}", format_timestamp(line.timestamp_ms).bold(), value)
}
