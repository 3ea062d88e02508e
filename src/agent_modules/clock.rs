use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Time of one sampling cycle, shared by every metric written in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub timestamp: i64,
    pub datetime: String,
}

impl Stamp {
    pub fn from_datetime<Tz>(now: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        Self {
            timestamp: now.timestamp(),
            datetime: now.format(DATETIME_FORMAT).to_string(),
        }
    }
}

/// A clock that is read once per cycle and then stays frozen.
pub trait Clock {
    /// Captures the current time. Until the next call, `current` returns it.
    fn update(&mut self);
    fn current(&self) -> &Stamp;
}

/// Wall-clock time in the host's local time zone.
#[derive(Debug, Clone)]
pub struct LocalClock {
    stamp: Stamp,
}

impl LocalClock {
    pub fn new() -> Self {
        Self {
            stamp: Stamp::from_datetime(&Local::now()),
        }
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LocalClock {
    fn update(&mut self) {
        self.stamp = Stamp::from_datetime(&Local::now());
    }

    fn current(&self) -> &Stamp {
        &self.stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_stamp_format_and_epoch() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let stamp = Stamp::from_datetime(&now);
        assert_eq!(stamp.timestamp, 1_709_967_901);
        assert_eq!(stamp.datetime, "2024-03-09 07:05:01");
    }

    #[test]
    fn test_datetime_uses_the_given_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 3, 9, 9, 5, 1).unwrap();
        let stamp = Stamp::from_datetime(&now);
        // Same instant as above, rendered in local (UTC+2) time.
        assert_eq!(stamp.timestamp, 1_709_967_901);
        assert_eq!(stamp.datetime, "2024-03-09 09:05:01");
    }

    #[test]
    fn test_local_clock_is_frozen_between_updates() {
        let mut clock = LocalClock::new();
        let first = clock.current().clone();
        assert_eq!(clock.current(), &first);
        assert_eq!(first.datetime.len(), 19);

        clock.update();
        assert!(clock.current().timestamp >= first.timestamp);
    }
}
