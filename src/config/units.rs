//! Size and duration quantities as they appear in ecosystem files.
//!
//! Byte quantities accept a plain integer (bytes) or a number with a
//! 1024-based `K`/`M`/`G`/`T` suffix and an optional trailing `B`
//! (`"512M"`, `"1G"`, `"1.5GB"`). Durations accept a plain integer
//! (milliseconds) or a number with an `ms`/`s`/`m`/`h` suffix (`"10s"`).
//! Both always serialize back as plain integers.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse a byte quantity such as `"1G"` into a number of bytes
pub fn parse_byte_size(input: &str) -> std::result::Result<u64, String> {
    let trimmed = input.trim();
    let without_b = trimmed
        .strip_suffix('B')
        .or_else(|| trimmed.strip_suffix('b'))
        .unwrap_or(trimmed);

    let (number, multiplier) = match without_b.chars().last() {
        Some('K') | Some('k') => (&without_b[..without_b.len() - 1], 1u64 << 10),
        Some('M') | Some('m') => (&without_b[..without_b.len() - 1], 1u64 << 20),
        Some('G') | Some('g') => (&without_b[..without_b.len() - 1], 1u64 << 30),
        Some('T') | Some('t') => (&without_b[..without_b.len() - 1], 1u64 << 40),
        _ => (without_b, 1),
    };

    let value = parse_non_negative(number.trim())
        .map_err(|reason| format!("invalid byte quantity '{}': {}", input, reason))?;

    Ok((value * multiplier as f64).round() as u64)
}

/// Parse a duration such as `"10s"`; a bare number is milliseconds
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let trimmed = input.trim();

    let (number, millis_per_unit) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (trimmed, 1.0)
    };

    let value = parse_non_negative(number.trim())
        .map_err(|reason| format!("invalid duration '{}': {}", input, reason))?;

    Ok(Duration::from_millis((value * millis_per_unit).round() as u64))
}

fn parse_non_negative(number: &str) -> std::result::Result<f64, String> {
    if number.is_empty() {
        return Err("missing number".to_string());
    }
    let value: f64 = number.parse().map_err(|_| format!("'{}' is not a number", number))?;
    if !value.is_finite() {
        return Err("value is not finite".to_string());
    }
    if value < 0.0 {
        return Err("value must not be negative".to_string());
    }
    Ok(value)
}

/// Serde adapter for optional byte quantities (`max_memory_restart`)
pub mod byte_size {
    use super::*;

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_u64(*bytes),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RawQuantity>::deserialize(deserializer)?;
        raw.map(|raw| match raw {
            RawQuantity::Int(n) if n >= 0 => Ok(n as u64),
            RawQuantity::Int(n) => Err(D::Error::custom(format!(
                "byte quantity must not be negative: {}",
                n
            ))),
            RawQuantity::Float(f) => {
                parse_byte_size(&f.to_string()).map_err(D::Error::custom)
            }
            RawQuantity::Text(s) => parse_byte_size(&s).map_err(D::Error::custom),
        })
        .transpose()
    }
}

/// Serde adapter for millisecond durations (`min_uptime`, `restart_delay`, `kill_timeout`)
pub mod duration_ms {
    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Int(n) if n >= 0 => Ok(Duration::from_millis(n as u64)),
            RawQuantity::Int(n) => Err(D::Error::custom(format!(
                "duration must not be negative: {}",
                n
            ))),
            RawQuantity::Float(f) => parse_duration(&f.to_string()).map_err(D::Error::custom),
            RawQuantity::Text(s) => parse_duration(&s).map_err(D::Error::custom),
        }
    }
}
