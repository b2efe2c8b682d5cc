//! Next-feed prediction.
//!
//! The device feeds on its own timer: one feed every `feed_interval_sec`
//! after the previous one.  The bridge never drives feeding; it only derives
//! when the next one should happen so the operator can spot an overdue feed.

use serde::Serialize;
use time::UtcOffset;

use crate::clock::format_display_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledPrediction {
    pub next_feed_time: Option<i64>,
    pub disabled: bool,
}

impl ScheduledPrediction {
    /// A prediction in the past means the device missed (or has not yet
    /// reported) a feed.
    pub fn is_overdue(&self, now: i64) -> bool {
        matches!(self.next_feed_time, Some(t) if t < now)
    }

    pub fn describe(&self, now: i64, offset: UtcOffset) -> String {
        match self.next_feed_time {
            _ if self.disabled => "disabled".to_string(),
            Some(t) if t < now => format!("{} (overdue)", format_display_time(t, offset)),
            Some(t) => format_display_time(t, offset),
            None => "--".to_string(),
        }
    }
}

/// `last_feed + interval`, or `now + interval` when no feed was seen yet.
/// An interval of zero means automatic feeding is off.
pub fn predict_next(
    last_feed: Option<i64>,
    feed_interval_sec: u32,
    now: i64,
) -> ScheduledPrediction {
    if feed_interval_sec == 0 {
        return ScheduledPrediction {
            next_feed_time: None,
            disabled: true,
        };
    }
    let base = last_feed.unwrap_or(now);
    ScheduledPrediction {
        next_feed_time: Some(base.saturating_add(i64::from(feed_interval_sec))),
        disabled: false,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
