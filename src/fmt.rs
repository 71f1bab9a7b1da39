//! Provides helpers to parse and render the sizes and durations used in the config.
use std::time::Duration;

use anyhow::Context;

const SIZE_UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// Renders a size in bytes using the largest fitting binary unit.
///
/// # Examples
///
/// ```
/// assert_eq!(fcache::fmt::format_size(0), "0 bytes");
/// assert_eq!(fcache::fmt::format_size(1), "1 byte");
/// assert_eq!(fcache::fmt::format_size(100), "100 bytes");
/// assert_eq!(fcache::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(fcache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(fcache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(fcache::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(fcache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        size if size < 1024 => return format!("{} bytes", size),
        _ => (),
    }

    let mut unit = 0;
    let mut size = size_in_bytes as f64 / 1024.;
    while size >= 1024. && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size <= 10. {
        format!("{:.2} {}", size, SIZE_UNITS[unit])
    } else if size <= 100. {
        format!("{:.1} {}", size, SIZE_UNITS[unit])
    } else {
        format!("{:.0} {}", size, SIZE_UNITS[unit])
    }
}

/// Parses a size like **2k** or **512 M** as used for the capacity of a group.
///
/// Supported suffixes are **b** (bytes), **k**, **m**, **g** and **t** (binary units), in
/// either case. A value without suffix is treated as bytes.
///
/// # Examples
///
/// ```
/// assert_eq!(fcache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(fcache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(fcache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(fcache::fmt::parse_size("8 M").unwrap(), 8 * 1024 * 1024);
/// assert_eq!(fcache::fmt::parse_size("1g").unwrap(), 1024 * 1024 * 1024);
///
/// assert_eq!(fcache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(fcache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(fcache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*([bBkKmMgGtT]?)\s*$").unwrap();
    }

    let captures = SIZE.captures(str.as_ref()).with_context(|| {
        format!(
            "Cannot parse '{}' as size. Expected a positive number with an optional unit (b, k, m, g, t).",
            str.as_ref()
        )
    })?;
    let number = captures[1]
        .parse::<usize>()
        .with_context(|| format!("Size '{}' is out of range.", str.as_ref()))?;
    let factor: usize = match &captures[2] {
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        "t" | "T" => 1 << 40,
        _ => 1,
    };

    number
        .checked_mul(factor)
        .with_context(|| format!("Size '{}' is out of range.", str.as_ref()))
}

/// Parses a duration like **500ms**, **2s** or **1 m** as used for peer timeouts.
///
/// Supported suffixes are **ms**, **s**, **m** (minutes) and **h**, in either case. A value
/// without suffix is treated as milliseconds.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(fcache::fmt::parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(fcache::fmt::parse_duration("500 ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(fcache::fmt::parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(fcache::fmt::parse_duration("3 M").unwrap(), Duration::from_secs(180));
/// assert_eq!(fcache::fmt::parse_duration("1h").unwrap(), Duration::from_secs(3600));
///
/// assert_eq!(fcache::fmt::parse_duration("3 Y").is_err(), true);
/// assert_eq!(fcache::fmt::parse_duration("1.5s").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref DURATION: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*(ms|MS|s|S|m|M|h|H)?\s*$").unwrap();
    }

    let captures = DURATION.captures(str.as_ref()).with_context(|| {
        format!(
            "Cannot parse '{}' as duration. Expected a positive number with an optional unit (ms, s, m, h).",
            str.as_ref()
        )
    })?;
    let number = captures[1]
        .parse::<u64>()
        .with_context(|| format!("Duration '{}' is out of range.", str.as_ref()))?;

    let seconds_per_unit = match captures.get(2).map(|unit| unit.as_str()) {
        Some("s") | Some("S") => 1,
        Some("m") | Some("M") => 60,
        Some("h") | Some("H") => 60 * 60,
        _ => return Ok(Duration::from_millis(number)),
    };

    number
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .with_context(|| format!("Duration '{}' is out of range.", str.as_ref()))
}
