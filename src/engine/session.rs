//! # engine::session — SessionClock
//!
//! แปลง UTC timestamp → เวลาท้องถิ่น (civil time) แล้วบอกว่าอยู่ Session ไหน
//!
//! | Phase     | Civil time     |
//! |-----------|----------------|
//! | Asia      | 00:00 – 09:00  |
//! | London    | 09:00 – 14:30  |
//! | Trading   | 14:30 – 21:00  |
//! | Closed    | 21:00 – 24:00  |
//!
//! Offset มาจาก chrono-tz ของวันนั้นจริง ๆ (DST-aware) ไม่ใช่ค่าคงที่

use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::models::candle::CANDLE_PERIOD_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Asia,
    London,
    Trading,
    Closed,
}

// ─── Window Bounds (civil) ────────────────────────────────────────────────────

pub fn london_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn trading_open() -> NaiveTime {
    NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN)
}

pub fn trading_close() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN)
}

// ─── SessionClock ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    tz: Tz,
}

impl SessionClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn civil(&self, ts: DateTime<Utc>) -> DateTime<Tz> {
        ts.with_timezone(&self.tz)
    }

    pub fn civil_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        self.civil(ts).date_naive()
    }

    pub fn phase(&self, ts: DateTime<Utc>) -> SessionPhase {
        let t = self.civil(ts).time();
        if t < london_open() {
            SessionPhase::Asia
        } else if t < trading_open() {
            SessionPhase::London
        } else if t < trading_close() {
            SessionPhase::Trading
        } else {
            SessionPhase::Closed
        }
    }

    #[inline]
    pub fn in_trading_window(&self, ts: DateTime<Utc>) -> bool {
        self.phase(ts) == SessionPhase::Trading
    }

    /// UTC instant of a civil wall-clock time on `date`. Ambiguous times
    /// (autumn fall-back) resolve to the earlier instant; a time skipped by the
    /// spring gap resolves to the first valid instant after it.
    pub fn instant(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        match self.tz.from_local_datetime(&local).earliest() {
            Some(dt) => dt.with_timezone(&Utc),
            None => {
                let shifted = local + Duration::hours(1);
                self.tz
                    .from_local_datetime(&shifted)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&local))
            }
        }
    }

    /// Start of the M5 candle containing `ts`.
    pub fn candle_boundary(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let period = CANDLE_PERIOD_MINUTES * 60;
        let floored = secs - secs.rem_euclid(period);
        DateTime::from_timestamp(floored, 0).unwrap_or(ts.with_nanosecond(0).unwrap_or(ts))
    }
}

// ─── Clock ────────────────────────────────────────────────────────────────────

/// เวลาปัจจุบัน — แยกเป็น trait เพื่อให้ test คุมเวลาได้
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> SessionClock {
        SessionClock::new(chrono_tz::Europe::Paris)
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn phases_in_winter_use_cet_offset() {
        let clock = paris();
        // 2024-01-15: CET = UTC+1
        assert_eq!(clock.phase(utc(2024, 1, 15, 7, 59)), SessionPhase::Asia);
        assert_eq!(clock.phase(utc(2024, 1, 15, 8, 0)), SessionPhase::London);
        assert_eq!(clock.phase(utc(2024, 1, 15, 13, 29)), SessionPhase::London);
        assert_eq!(clock.phase(utc(2024, 1, 15, 13, 30)), SessionPhase::Trading);
        assert_eq!(clock.phase(utc(2024, 1, 15, 19, 59)), SessionPhase::Trading);
        assert_eq!(clock.phase(utc(2024, 1, 15, 20, 0)), SessionPhase::Closed);
        assert_eq!(clock.phase(utc(2024, 1, 15, 23, 0)), SessionPhase::Asia);
    }

    #[test]
    fn dst_transition_shifts_utc_window() {
        let clock = paris();
        // Friday before the switch (CET, +1): 14:30 Paris = 13:30 UTC
        assert!(clock.in_trading_window(utc(2024, 3, 29, 13, 30)));
        assert!(!clock.in_trading_window(utc(2024, 3, 29, 12, 30)));
        // Tuesday after the switch (CEST, +2): 14:30 Paris = 12:30 UTC
        assert!(clock.in_trading_window(utc(2024, 4, 2, 12, 30)));
        assert!(!clock.in_trading_window(utc(2024, 4, 2, 19, 0)));
    }

    #[test]
    fn civil_date_rolls_at_local_midnight() {
        let clock = paris();
        // 23:30 UTC on the 15th is 00:30 on the 16th in Paris (winter)
        assert_eq!(
            clock.civil_date(utc(2024, 1, 15, 23, 30)),
            NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
        );
    }

    #[test]
    fn instant_resolves_civil_time_to_utc() {
        let clock = paris();
        let day = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(clock.instant(day, london_open()), utc(2024, 7, 1, 7, 0));
        // 02:30 does not exist on 2024-03-31 in Paris
        let gap_day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let t = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert_eq!(clock.instant(gap_day, t), utc(2024, 3, 31, 1, 30));
    }

    #[test]
    fn candle_boundary_floors_to_five_minutes() {
        let clock = paris();
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 14, 37, 42).unwrap();
        assert_eq!(clock.candle_boundary(ts), utc(2024, 1, 15, 14, 35));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(utc(2024, 1, 15, 14, 0));
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), utc(2024, 1, 15, 14, 5));
    }
}
