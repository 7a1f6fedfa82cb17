// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Duration strings (`30s`, `5m`, `1h30m`, `250ms`) as used in resource specs and configuration.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid duration '{0}': expected a sequence like 30s, 5m or 1h30m")]
pub struct DurationError(pub String);

fn fractional_pattern() -> &'static Regex {
    static FRACTIONAL: OnceLock<Regex> = OnceLock::new();
    FRACTIONAL.get_or_init(|| {
        Regex::new(r"(?P<whole>[0-9]*)\.(?P<fraction>[0-9]+)(?P<unit>ns|us|µs|ms|s|m|h)")
            .expect("static regex")
    })
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        _ => 3_600_000_000_000,
    }
}

/// Rewrite fractional segments such as `1.5s` into whole nanoseconds.
fn normalize(value: &str) -> Cow<'_, str> {
    fractional_pattern().replace_all(value, |captures: &Captures| {
        let unit = unit_nanos(&captures["unit"]);
        let whole: u128 = captures["whole"].parse().unwrap_or(0);
        // More digits than this cannot change the result at nanosecond precision
        let fraction = &captures["fraction"][..captures["fraction"].len().min(18)];
        let scale = 10u128.pow(fraction.len() as u32);
        let fraction: u128 = fraction.parse().unwrap_or(0);
        format!("{}ns", whole.saturating_mul(unit) + fraction * unit / scale)
    })
}

/// Parse a duration string into a [`Duration`].
///
/// A bare `0` is accepted; every other value needs a unit on each segment.
pub fn parse_duration(value: &str) -> Result<Duration, DurationError> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(&normalize(trimmed)).map_err(|_| DurationError(value.to_string()))
}
