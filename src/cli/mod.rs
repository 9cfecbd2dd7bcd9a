//! CLI command implementations.

pub mod check;
pub mod create;
pub mod delete;
pub mod info;
pub mod list;
pub mod logs;
pub mod restart;
pub mod rotate_password;
pub mod serve;
pub mod start;
pub mod stats;
pub mod stop;
pub mod sweep;
pub mod usage;

use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> vpsman::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| vpsman::Error::Io(std::io::Error::other(e)))?;
    println!("{}", text);
    Ok(())
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Truncate a string to max length, adding "..." if needed.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
