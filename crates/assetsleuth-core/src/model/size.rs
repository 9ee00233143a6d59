/// Formatting helpers for the human-readable `file_details` string.
///
/// All internal sizes are `u64` bytes and timestamps are Unix seconds.
/// Floating point and local time are only used at the formatting boundary.
use chrono::{Local, TimeZone};

/// Format a byte count into a human-readable string with appropriate unit.
///
/// Uses binary units (KiB = 1024) but labels them with the short forms
/// (KB, MB, GB, TB) artists expect to see next to a file.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else if b < TB {
        format!("{:.2} GB", b / GB)
    } else {
        format!("{:.2} TB", b / TB)
    }
}

/// Format a count with thousand separators.
pub fn format_count(count: u64) -> String {
    let s = count.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Format a Unix timestamp as `dd/mm/yyyy hh:mm` in local time.
pub fn format_mtime(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%d/%m/%Y %H:%M").to_string(),
        None => String::new(),
    }
}

/// Build the `file_details` string shown under an item.
///
/// Sequences lead with their frame count: `12f;01/02/2024 10:30;1.5 MB`.
/// Plain files omit it: `01/02/2024 10:30;512 B`.
pub fn format_details(frame_count: Option<usize>, mtime: i64, bytes: u64) -> String {
    let stamp = format_mtime(mtime);
    let size = format_size(bytes);
    match frame_count {
        Some(n) => format!("{n}f;{stamp};{size}"),
        None => format!("{stamp};{size}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn details_prefix_frame_count_for_sequences() {
        let details = format_details(Some(3), 0, 2048);
        assert!(details.starts_with("3f;"), "got {details}");
        assert!(details.ends_with(";2.0 KB"), "got {details}");
    }

    #[test]
    fn details_for_plain_file_have_two_fields() {
        let details = format_details(None, 1_700_000_000, 10);
        assert_eq!(details.split(';').count(), 2);
        assert!(details.ends_with("10 B"));
    }
}
