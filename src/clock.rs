//! Clock
//!
//! Injectable wall clock. KYC attempt resets and monthly limit periods follow
//! the business calendar, which is a fixed UTC offset (IST by default).

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::sync::Mutex;

/// India Standard Time offset in seconds
pub const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset used to derive the business calendar date
    fn offset(&self) -> FixedOffset;

    /// Calendar date in the business timezone
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset()).date_naive()
    }

    /// Limit period key, e.g. "2024-03"
    fn current_period(&self) -> String {
        self.period_of(self.now())
    }

    /// Limit period `at` falls in
    fn period_of(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset()).format("%Y-%m").to_string()
    }
}

/// Out-of-range offsets fall back to UTC
fn fixed_offset(secs: i32) -> FixedOffset {
    FixedOffset::east_opt(secs).unwrap_or(Utc.fix())
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset_secs: i32) -> Self {
        Self {
            offset: fixed_offset(offset_secs),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(IST_OFFSET_SECS)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            offset: fixed_offset(IST_OFFSET_SECS),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_today_uses_business_offset() {
        // 20:00 UTC is already the next day in IST
        let start = Utc.with_ymd_and_hms(2024, 3, 31, 20, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(clock.current_period(), "2024-04");
    }

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(1));
        assert_eq!(clock.now(), start + Duration::days(1));
    }
}
