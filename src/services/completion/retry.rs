//! Backoff arithmetic for completion retries.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Delay before retry number `attempt + 1`: `base * 2^attempt`, raised to the
/// provider's `retry-after` when that is longer.
///
/// The exponential part is capped at `max`. A `retry-after` longer than `max`
/// yields `None`: the caller gives up instead of sleeping that long.
pub fn backoff_delay(
    base: Duration,
    attempt: u32,
    retry_after: Option<Duration>,
    max: Duration,
) -> Option<Duration> {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt)).min(max);
    match retry_after {
        Some(hint) if hint > max => None,
        Some(hint) => Some(exponential.max(hint)),
        None => Some(exponential),
    }
}

/// Parse a `retry-after` header: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
