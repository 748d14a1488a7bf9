//! # models::candle
//!
//! แท่งเทียน M5 ที่ปิดแล้ว — `time` คือเวลาปิดแท่ง (UTC)
//! ทุก Component ใน engine อ่านอย่างเดียว ไม่มีการแก้ไขหลังปิดแท่ง

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// ความยาวของแท่งเทียน (M5)
pub const CANDLE_PERIOD_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Close timestamp (UTC)
    pub time:   DateTime<Utc>,
    pub open:   f64,
    pub high:   f64,
    pub low:    f64,
    pub close:  f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// เวลาเปิดแท่ง — ใช้ตัดสินว่าแท่งนี้อยู่ใน Session ไหน
    #[inline]
    pub fn open_time(&self) -> DateTime<Utc> {
        self.time - Duration::minutes(CANDLE_PERIOD_MINUTES)
    }

    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    #[inline]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// True range relative to the previous close (ATR input).
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let hl = self.high - self.low;
        match prev_close {
            Some(pc) => hl.max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => hl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn open_time_is_one_period_before_close() {
        let close = Utc.with_ymd_and_hms(2024, 3, 4, 14, 35, 0).unwrap();
        let c = Candle { time: close, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 0.0 };
        assert_eq!(c.open_time(), Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap());
        assert!(c.is_bullish());
        assert!(!c.is_bearish());
    }

    #[test]
    fn true_range_uses_gap_from_previous_close() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let c = Candle { time: t, open: 105.0, high: 106.0, low: 104.0, close: 105.5, volume: 0.0 };
        assert_eq!(c.true_range(None), 2.0);
        assert_eq!(c.true_range(Some(100.0)), 6.0);
    }
}
