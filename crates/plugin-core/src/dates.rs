use anyhow::{Result, anyhow};
use time::{Duration, OffsetDateTime, UtcOffset, macros::format_description};

const OUT_OF_RANGE: &str = "expiry out of range";


/// Human-readable date, e.g. `2020/09/15 Tue 09:00:00 UTC+09:00`.
#[must_use]
pub fn display_date(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(format_description!(
            "[year]/[month]/[day] [weekday repr:short] [hour]:[minute]:[second] UTC[offset_hour sign:mandatory]:[offset_minute]"
        ))
        .unwrap_or_default()
}

/// Date fragment safe for file names, e.g. `20200915_Tue_090000`.
#[must_use]
pub fn file_name_date(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(format_description!(
            "[year][month][day]_[weekday repr:short]_[hour][minute][second]"
        ))
        .unwrap_or_default()
}

/// RFC 7231 date, always in GMT.
#[must_use]
pub fn http_date(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .unwrap_or_default()
}

/// Parses a platform timestamp such as `1515449522.000016`. The fractional
/// part is dropped.
#[must_use]
pub fn parse_event_ts(ts: &str) -> Option<OffsetDateTime> {
    let seconds = ts.trim().split('.').next()?.parse::<i64>().ok()?;
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

pub fn days(count: i64) -> Result<Duration> {
    scaled(count, 86_400)
}

pub fn minutes(count: i64) -> Result<Duration> {
    scaled(count, 60)
}

fn scaled(count: i64, unit_seconds: i64) -> Result<Duration> {
    count
        .checked_mul(unit_seconds)
        .map(Duration::seconds)
        .ok_or_else(|| anyhow!(OUT_OF_RANGE))
}

/// `from + lifetime`, failing instead of leaving the representable range.
pub fn expiry_after(from: OffsetDateTime, lifetime: Duration) -> Result<OffsetDateTime> {
    from.checked_add(lifetime)
        .ok_or_else(|| anyhow!(OUT_OF_RANGE))
}
