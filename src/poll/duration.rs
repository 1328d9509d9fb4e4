use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use super::error::ValidationError;

/// `days:hours:minutes`, days unrestricted, hours 0-24, minutes 0-59.
static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):([01]?\d|2[0-4]):([0-5]?\d)$").expect("duration pattern is valid")
});

/// Hard ceiling on days so the resolved timestamp stays representable.
const MAX_DAYS: i64 = 36_500;

pub fn parse_duration(raw: &str) -> Result<Duration, ValidationError> {
    let malformed = || ValidationError::MalformedDuration(raw.to_string());
    let captures = DURATION_PATTERN.captures(raw.trim()).ok_or_else(malformed)?;

    let field = |index: usize| -> Result<i64, ValidationError> {
        captures[index].parse::<i64>().map_err(|_| malformed())
    };
    let days = field(1)?;
    let hours = field(2)?;
    let minutes = field(3)?;
    if days > MAX_DAYS {
        return Err(malformed());
    }

    Ok(Duration::days(days) + Duration::hours(hours) + Duration::minutes(minutes))
}

/// Absolute expiry for a duration entered at `now`.
pub fn resolve_expiry(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
    let duration = parse_duration(raw)?;
    now.checked_add_signed(duration)
        .ok_or_else(|| ValidationError::MalformedDuration(raw.to_string()))
}
