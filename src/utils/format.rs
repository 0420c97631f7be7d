//! Human-readable durations and sizes for CLI output.

use std::time::Duration;

/// Compact uptime: `42s`, `5m3s`, `2h15m`, `3d4h`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m{}s", s / 60, s % 60),
        s if s < 86_400 => format!("{}h{}m", s / 3_600, (s / 60) % 60),
        s => format!("{}d{}h", s / 86_400, (s / 3_600) % 24),
    }
}

/// Binary-prefixed size with one decimal: `512 B`, `1.5 KB`, `3.0 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, PREFIXES[exp])
}

/// Cut `text` to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(5 * 60 + 3)), "5m3s");
        assert_eq!(format_duration(Duration::from_secs(2 * 3600 + 15 * 60 + 59)), "2h15m");
        assert_eq!(format_duration(Duration::from_secs(3 * 86_400 + 4 * 3600)), "3d4h");
    }

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
