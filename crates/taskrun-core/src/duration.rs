//! Go-style duration strings (`10s`, `1m30s`, `1h0m0s`, `1.5ms`).
//!
//! Run timeouts are written and reported in this format, so the timeout
//! message on a run reads the same as the duration the user configured.

use std::fmt::Write;
use std::time::Duration;

use crate::CoreError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Format a duration the way Go's `time.Duration.String` does.
pub fn format(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < NANOS_PER_SEC {
        let (unit, scale) = if nanos < 1_000 {
            ("ns", 1)
        } else if nanos < 1_000_000 {
            ("µs", 1_000)
        } else {
            ("ms", 1_000_000)
        };
        return format!("{}{}", fraction(nanos, scale), unit);
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        write!(out, "{hours}h").ok();
    }
    if hours > 0 || minutes > 0 {
        write!(out, "{minutes}m").ok();
    }
    let sec_nanos = u128::from(secs) * NANOS_PER_SEC + u128::from(d.subsec_nanos());
    write!(out, "{}s", fraction(sec_nanos, NANOS_PER_SEC)).ok();
    out
}

/// Render `value / scale` with trailing fractional zeros trimmed.
fn fraction(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a Go-style duration string such as `90s`, `1h30m` or `2.5s`.
pub fn parse(input: &str) -> Result<Duration, CoreError> {
    let invalid = |reason: &str| CoreError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err(invalid("empty string"));
    }

    let mut rest = input;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing unit"))?;
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return Err(invalid("unknown unit")),
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("expected a number"));
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("malformed number"))?
        };
        total = whole
            .checked_mul(unit_nanos)
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| invalid("overflow"))?;

        if !frac.is_empty() {
            if !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("malformed fraction"));
            }
            // Digits past this point are below nanosecond precision for every unit.
            let frac = &frac[..frac.len().min(MAX_FRACTION_DIGITS)];
            let digits: u128 = frac.parse().map_err(|_| invalid("malformed fraction"))?;
            let scale = 10u128.pow(frac.len() as u32);
            total = digits
                .checked_mul(unit_nanos)
                .map(|n| n / scale)
                .and_then(|n| total.checked_add(n))
                .ok_or_else(|| invalid("overflow"))?;
        }

        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| invalid("overflow"))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

/// Serde adapter for `Option<Duration>` fields written as duration strings.
pub mod option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_str(&super::format(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
