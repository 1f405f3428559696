//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Shared primitives and utilities for the exporter runtime."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Parse a Go-style duration (`500ms`, `20s`, `1m30s`, `1.5h`) or bare seconds.
///
/// Used as a `clap` value parser so environment variables keep the format
/// operators already use for the exporter.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let input = raw.trim();
    if input.is_empty() {
        return Err("empty duration".to_owned());
    }
    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        total += value * scale;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_secs_f64(total))
}

/// Whole-second unix timestamp as a gauge value.
pub fn unix_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp() as f64
}
