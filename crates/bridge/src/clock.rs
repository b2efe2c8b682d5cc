//! Wall-clock helpers and the "MM/DD HH:MM" display format shared with the
//! device firmware.

use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Format an epoch as "MM/DD HH:MM" in `offset`.  Out-of-range epochs are
/// shown as the bare number.
pub fn format_display_time(epoch: i64, offset: UtcOffset) -> String {
    let fmt = format_description!("[month]/[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|dt| dt.to_offset(offset).format(&fmt).ok())
        .unwrap_or_else(|| epoch.to_string())
}

/// Rebuild an epoch from a year-less "MM/DD HH:MM" string.
///
/// The year is taken from `now` in `offset`.  This is an approximation: a
/// feed shown as "12/31 23:50" and reconstructed on Jan 1 lands a year in the
/// future.  Seconds are lost as well.  Only used when no epoch was recorded.
pub fn reconstruct_display_time(display: &str, now: i64, offset: UtcOffset) -> Option<i64> {
    let (date_part, time_part) = display.trim().split_once(' ')?;
    let (month, day) = date_part.split_once('/')?;
    let (hour, minute) = time_part.trim().split_once(':')?;

    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day = day.parse::<u8>().ok()?;
    let hour = hour.parse::<u8>().ok()?;
    let minute = minute.parse::<u8>().ok()?;

    let year = OffsetDateTime::from_unix_timestamp(now)
        .ok()?
        .to_offset(offset)
        .year();
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, 0).ok()?;
    Some(
        PrimitiveDateTime::new(date, time)
            .assume_offset(offset)
            .unix_timestamp(),
    )
}

/// Offset from whole minutes east of UTC, falling back to UTC when out of range.
pub fn offset_from_minutes(minutes: i32) -> UtcOffset {
    UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC)
}

// ===========================================================================
// Tests
// ===========================================================================
