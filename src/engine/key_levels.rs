//! # engine::key_levels — KeyLevelTracker
//!
//! State machine ต่อ (asset, civil day):
//! `NotStarted → Accumulating{high,low} → Frozen{high,low}`
//!
//! - แท่งเทียนที่ open_time อยู่ใน Session ที่ยัง Accumulating → ขยาย high/low
//! - แท่งแรกที่ข้ามออกนอก window → Freeze ทันที (ไม่แก้อีกตลอดวัน)
//! - Session ที่ไม่มีแท่งเลย → ไม่มี level (ไม่เดา)
//! - prev_day = extreme ทั้งวันของวันล่าสุดที่ track ได้ ใช้ได้ตั้งแต่แท่งแรกของวันใหม่

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::engine::session::{london_open, trading_open, SessionClock, SessionPhase};
use crate::models::{Candle, KeyLevel, KeyLevelSet};

// ─── Session Range ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionRange {
    NotStarted,
    Accumulating { high: f64, low: f64 },
    Frozen { high: KeyLevel, low: KeyLevel },
}

impl SessionRange {
    fn extend(&mut self, candle: &Candle) {
        match self {
            SessionRange::NotStarted => {
                *self = SessionRange::Accumulating { high: candle.high, low: candle.low };
            }
            SessionRange::Accumulating { high, low } => {
                *high = high.max(candle.high);
                *low = low.min(candle.low);
            }
            SessionRange::Frozen { .. } => {}
        }
    }

    fn freeze(&mut self, at: DateTime<Utc>) {
        if let SessionRange::Accumulating { high, low } = *self {
            *self = SessionRange::Frozen {
                high: KeyLevel { price: high, frozen_at: at },
                low:  KeyLevel { price: low, frozen_at: at },
            };
        }
    }

    fn high(&self) -> Option<KeyLevel> {
        match self {
            SessionRange::Frozen { high, .. } => Some(*high),
            _ => None,
        }
    }

    fn low(&self) -> Option<KeyLevel> {
        match self {
            SessionRange::Frozen { low, .. } => Some(*low),
            _ => None,
        }
    }
}

// ─── Tracker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KeyLevelTracker {
    clock:     SessionClock,
    day:       Option<NaiveDate>,
    asia:      SessionRange,
    london:    SessionRange,
    /// Full-day running extremes of `day`
    day_range: SessionRange,
    prev_day:  Option<(KeyLevel, KeyLevel)>,
    last_seen: Option<DateTime<Utc>>,
}

impl KeyLevelTracker {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            clock,
            day:       None,
            asia:      SessionRange::NotStarted,
            london:    SessionRange::NotStarted,
            day_range: SessionRange::NotStarted,
            prev_day:  None,
            last_seen: None,
        }
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Feed one closed candle. Returns `false` (and ignores it) when the candle
    /// is not newer than the last one observed.
    pub fn observe(&mut self, candle: &Candle) -> bool {
        if self.last_seen.is_some_and(|seen| candle.time <= seen) {
            return false;
        }
        self.last_seen = Some(candle.time);

        let open = candle.open_time();
        let date = self.clock.civil_date(open);

        if self.day != Some(date) {
            self.roll_day(date);
        }

        self.day_range.extend(candle);

        match self.clock.phase(open) {
            SessionPhase::Asia => self.asia.extend(candle),
            SessionPhase::London => {
                self.asia.freeze(self.boundary(date, london_open()));
                self.london.extend(candle);
            }
            SessionPhase::Trading | SessionPhase::Closed => {
                self.asia.freeze(self.boundary(date, london_open()));
                self.london.freeze(self.boundary(date, trading_open()));
            }
        }
        true
    }

    /// Frozen levels for the current day; `None` before the first candle.
    pub fn levels(&self) -> Option<KeyLevelSet> {
        let day = self.day?;
        let mut set = KeyLevelSet::empty(day);
        set.asia_high   = self.asia.high();
        set.asia_low    = self.asia.low();
        set.london_high = self.london.high();
        set.london_low  = self.london.low();
        if let Some((high, low)) = self.prev_day {
            set.prev_day_high = Some(high);
            set.prev_day_low  = Some(low);
        }
        Some(set)
    }

    fn roll_day(&mut self, date: NaiveDate) {
        let start = self.boundary(date, NaiveTime::MIN);
        let mut finished = self.day_range;
        finished.freeze(start);
        if let (Some(high), Some(low)) = (finished.high(), finished.low()) {
            self.prev_day = Some((high, low));
        }
        self.day       = Some(date);
        self.asia      = SessionRange::NotStarted;
        self.london    = SessionRange::NotStarted;
        self.day_range = SessionRange::NotStarted;
    }

    fn boundary(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        self.clock.instant(date, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn paris() -> SessionClock {
        SessionClock::new(chrono_tz::Europe::Paris)
    }

    /// Candle that *opens* at the given UTC time (winter, Paris = UTC+1).
    fn make_candle(open_utc: DateTime<Utc>, high: f64, low: f64) -> Candle {
        Candle {
            time:   open_utc + Duration::minutes(5),
            open:   (high + low) / 2.0,
            high,
            low,
            close:  (high + low) / 2.0,
            volume: 1.0,
        }
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    #[test]
    fn asia_freezes_on_first_london_candle() {
        let mut t = KeyLevelTracker::new(paris());
        // Paris 01:00 and 05:00 (Asia)
        t.observe(&make_candle(at(15, 0, 0), 2010.0, 2000.0));
        t.observe(&make_candle(at(15, 4, 0), 2020.0, 1995.0));

        let lv = t.levels().unwrap();
        assert!(lv.asia_high.is_none(), "still accumulating");

        // Paris 09:00 → London
        t.observe(&make_candle(at(15, 8, 0), 2030.0, 2015.0));
        let lv = t.levels().unwrap();
        let high = lv.asia_high.unwrap();
        assert_eq!(high.price, 2020.0);
        assert_eq!(lv.asia_low.unwrap().price, 1995.0);
        assert_eq!(high.frozen_at, at(15, 8, 0));
        assert!(lv.london_high.is_none());
    }

    #[test]
    fn frozen_levels_never_move() {
        let mut t = KeyLevelTracker::new(paris());
        t.observe(&make_candle(at(15, 2, 0), 2010.0, 2000.0));
        t.observe(&make_candle(at(15, 9, 0), 2005.0, 2001.0));
        t.observe(&make_candle(at(15, 13, 30), 2050.0, 1990.0)); // trading window

        let lv = t.levels().unwrap();
        assert_eq!(lv.asia_high.unwrap().price, 2010.0);
        assert_eq!(lv.london_high.unwrap().price, 2005.0);
        assert_eq!(lv.london_low.unwrap().price, 2001.0);

        t.observe(&make_candle(at(15, 14, 0), 2100.0, 1900.0));
        assert_eq!(t.levels().unwrap(), lv);
    }

    #[test]
    fn prev_day_available_from_first_candle_of_new_day() {
        let mut t = KeyLevelTracker::new(paris());
        t.observe(&make_candle(at(15, 2, 0), 2010.0, 2000.0));
        t.observe(&make_candle(at(15, 14, 0), 2040.0, 1980.0));
        // 23:05 UTC = 00:05 Paris on the 16th
        t.observe(&make_candle(at(15, 23, 5), 2001.0, 1999.0));

        let lv = t.levels().unwrap();
        assert_eq!(lv.day, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(lv.prev_day_high.unwrap().price, 2040.0);
        assert_eq!(lv.prev_day_low.unwrap().price, 1980.0);
        assert!(lv.asia_high.is_none());
    }

    #[test]
    fn session_without_candles_has_no_level() {
        let mut t = KeyLevelTracker::new(paris());
        // first candle lands in London; Asia never started
        t.observe(&make_candle(at(15, 10, 0), 2010.0, 2000.0));
        t.observe(&make_candle(at(15, 14, 0), 2020.0, 2005.0));
        let lv = t.levels().unwrap();
        assert!(lv.asia_high.is_none());
        assert!(lv.asia_low.is_none());
        assert_eq!(lv.london_high.unwrap().price, 2010.0);
        assert!(lv.prev_day_high.is_none());
    }

    #[test]
    fn stale_candles_are_ignored() {
        let mut t = KeyLevelTracker::new(paris());
        let c = make_candle(at(15, 2, 0), 2010.0, 2000.0);
        assert!(t.observe(&c));
        assert!(!t.observe(&c));
        assert!(!t.observe(&make_candle(at(15, 1, 0), 3000.0, 1000.0)));
    }

    #[test]
    fn no_levels_before_first_candle() {
        assert!(KeyLevelTracker::new(paris()).levels().is_none());
    }
}
