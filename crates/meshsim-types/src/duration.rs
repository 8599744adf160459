//! Duration strings such as `"100ms"` or `"1m30s"`.

use std::time::Duration;

use crate::ParseError;

/// Slowest accepted chat rate.
pub const CHAT_MAX: Duration = Duration::from_secs(3600);
/// Fastest accepted chat rate.
pub const CHAT_MIN: Duration = Duration::from_millis(1);

/// Parses a sequence of decimal numbers with unit suffixes.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` is
/// also accepted.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use meshsim_types::parse_duration;
/// assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let invalid = || ParseError::InvalidDuration(input.to_string());
    let text = input.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parses a chat rate, returning `None` when it does not parse or falls
/// outside `CHAT_MIN..=CHAT_MAX`. Out-of-range rates are ignored, not fatal.
pub fn chat_interval(input: &str) -> Option<Duration> {
    parse_duration(input)
        .ok()
        .filter(|rate| (CHAT_MIN..=CHAT_MAX).contains(rate))
}
