//! # engine::confluence — ConfluenceDetector
//!
//! สแกนหน้าต่างแท่งเทียนล่าสุด (default 20 แท่ง) หาโครงสร้าง SMC:
//!
//! 1. **FVG**          — 3 แท่งที่แท่ง 1 กับแท่ง 3 ไม่ทับกัน (เหลือ gap)
//! 2. **iFVG**         — FVG ที่ราคาปิดทะลุขอบไกลไปแล้ว → กลับบทบาท
//! 3. **Order Block**  — แท่งสวนทางแท่งสุดท้ายก่อน impulsive move
//! 4. **Breaker Block**— OB ที่ถูกปิดทะลุ → กลับบทบาท
//!
//! การกลับบทบาทเป็น pure function [`transition`] ของ (confluence, candle)
//! ไม่มีการลบประวัติ

use tracing::trace;

use crate::engine::indicators::{atr, ATR_PERIOD};
use crate::models::{Bias, Candle, Confluence, ConfluenceKind, Zone};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceConfig {
    /// จำนวนแท่งย้อนหลังที่สแกน
    pub window:           usize,
    /// Move ที่ยาวกว่า mult × ATR นับเป็น impulsive
    pub impulse_atr_mult: f64,
    /// หรือแท่งทิศเดียวกันติดกันอย่างน้อยกี่แท่ง
    pub min_consecutive:  usize,
    pub atr_period:       usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            window:           20,
            impulse_atr_mult: 2.0,
            min_consecutive:  3,
            atr_period:       ATR_PERIOD,
        }
    }
}

// ─── Detection ────────────────────────────────────────────────────────────────

/// Every confluence formed inside the trailing window, with its current role.
pub fn detect(candles: &[Candle], cfg: &ConfluenceConfig) -> Vec<Confluence> {
    let start = candles.len().saturating_sub(cfg.window);
    let window = &candles[start..];

    let mut found: Vec<(Confluence, usize)> = detect_fvgs(window);
    found.extend(detect_order_blocks(window, cfg));

    let mut out: Vec<Confluence> = found
        .into_iter()
        .map(|(conf, settled_at)| {
            window[settled_at + 1..]
                .iter()
                .fold(conf, |c, candle| transition(c, candle))
        })
        .collect();

    out.sort_by_key(|c| c.formed_at);
    trace!(count = out.len(), "confluences detected");
    out
}

/// `(confluence, index of the last candle that belongs to its formation)`
fn detect_fvgs(window: &[Candle]) -> Vec<(Confluence, usize)> {
    let mut out = Vec::new();
    for i in 2..window.len() {
        let (c1, c3) = (&window[i - 2], &window[i]);

        let zone_and_bias = if c1.high < c3.low {
            Some((Zone { low: c1.high, high: c3.low }, Bias::Bullish))
        } else if c1.low > c3.high {
            Some((Zone { low: c3.high, high: c1.low }, Bias::Bearish))
        } else {
            None
        };

        if let Some((zone, bias)) = zone_and_bias {
            out.push((
                Confluence {
                    kind:       ConfluenceKind::Fvg,
                    bias,
                    zone,
                    formed_at:  c3.time,
                    filled:     false,
                    flipped_at: None,
                },
                i,
            ));
        }
    }
    out
}

fn detect_order_blocks(window: &[Candle], cfg: &ConfluenceConfig) -> Vec<(Confluence, usize)> {
    let volatility = atr(window, cfg.atr_period).unwrap_or(0.0);
    let mut out = Vec::new();

    for i in 0..window.len().saturating_sub(1) {
        let ob = &window[i];
        let bias = if ob.is_bearish() {
            Bias::Bullish
        } else if ob.is_bullish() {
            Bias::Bearish
        } else {
            continue;
        };

        // run of candles moving against the OB candle
        let run = window[i + 1..]
            .iter()
            .take_while(|c| match bias {
                Bias::Bullish => c.is_bullish(),
                Bias::Bearish => c.is_bearish(),
            })
            .count();
        if run == 0 {
            continue;
        }
        let move_end = i + run;

        let magnitude = match bias {
            Bias::Bullish => {
                let top = window[i..=move_end].iter().map(|c| c.high).fold(f64::MIN, f64::max);
                top - ob.low
            }
            Bias::Bearish => {
                let bottom = window[i..=move_end].iter().map(|c| c.low).fold(f64::MAX, f64::min);
                ob.high - bottom
            }
        };

        let impulsive = run >= cfg.min_consecutive
            || (volatility > 0.0 && magnitude > cfg.impulse_atr_mult * volatility);
        if !impulsive {
            continue;
        }

        out.push((
            Confluence {
                kind:       ConfluenceKind::OrderBlock,
                bias,
                zone:       Zone { low: ob.low, high: ob.high },
                formed_at:  ob.time,
                filled:     false,
                flipped_at: None,
            },
            move_end,
        ));
    }
    out
}

// ─── Transition ───────────────────────────────────────────────────────────────

/// Apply one later candle to a confluence.
///
/// - FVG: range covering the whole gap marks it filled; a close past the far
///   edge flips it to iFVG with the opposite role.
/// - OB: a close beyond the block flips it to a Breaker Block.
/// - iFVG / Breaker Block are terminal.
pub fn transition(conf: Confluence, candle: &Candle) -> Confluence {
    let mut next = conf;
    let zone = conf.zone;

    let closed_through = match conf.bias {
        Bias::Bullish => candle.close < zone.low,
        Bias::Bearish => candle.close > zone.high,
    };

    match conf.kind {
        ConfluenceKind::Fvg => {
            if closed_through {
                next.kind       = ConfluenceKind::InverseFvg;
                next.bias       = conf.bias.opposite();
                next.filled     = true;
                next.flipped_at = Some(candle.time);
            } else if candle.low <= zone.low && candle.high >= zone.high {
                next.filled = true;
            }
        }
        ConfluenceKind::OrderBlock => {
            if closed_through {
                next.kind       = ConfluenceKind::BreakerBlock;
                next.bias       = conf.bias.opposite();
                next.filled     = true;
                next.flipped_at = Some(candle.time);
            }
        }
        ConfluenceKind::InverseFvg | ConfluenceKind::BreakerBlock => {}
    }
    next
}

/// The most recently formed confluence whose zone contains `price`.
pub fn confluence_at(confluences: &[Confluence], price: f64) -> Option<Confluence> {
    confluences
        .iter()
        .filter(|c| c.zone.contains(price))
        .max_by_key(|c| c.formed_at)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::minutes(5 * i)
    }

    fn make_candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle { time: t(i), open, high, low, close, volume: 1.0 }
    }

    fn quiet_cfg() -> ConfluenceConfig {
        // disable the ATR path so tests only exercise what they set up
        ConfluenceConfig { impulse_atr_mult: 1_000.0, ..ConfluenceConfig::default() }
    }

    #[test]
    fn bullish_fvg_detected_with_gap_zone() {
        let candles = vec![
            make_candle(0, 100.0, 101.0, 99.0, 100.5),
            make_candle(1, 100.5, 106.0, 100.4, 105.5),
            make_candle(2, 105.5, 107.0, 103.0, 106.5),
        ];
        let found = detect(&candles, &quiet_cfg());
        let fvg = found.iter().find(|c| c.kind == ConfluenceKind::Fvg).unwrap();
        assert_eq!(fvg.bias, Bias::Bullish);
        assert_eq!(fvg.zone, Zone { low: 101.0, high: 103.0 });
        assert_eq!(fvg.formed_at, t(2));
        assert!(!fvg.filled);
    }

    #[test]
    fn bearish_fvg_detected() {
        let candles = vec![
            make_candle(0, 110.0, 111.0, 109.0, 109.5),
            make_candle(1, 109.5, 109.6, 104.0, 104.5),
            make_candle(2, 104.5, 106.0, 103.0, 103.5),
        ];
        let found = detect(&candles, &quiet_cfg());
        let fvg = found.iter().find(|c| c.kind == ConfluenceKind::Fvg).unwrap();
        assert_eq!(fvg.bias, Bias::Bearish);
        assert_eq!(fvg.zone, Zone { low: 106.0, high: 109.0 });
    }

    #[test]
    fn fvg_fills_then_flips_to_inverse() {
        let fvg = Confluence {
            kind:       ConfluenceKind::Fvg,
            bias:       Bias::Bullish,
            zone:       Zone { low: 101.0, high: 103.0 },
            formed_at:  t(2),
            filled:     false,
            flipped_at: None,
        };

        // wick through the gap but close above it: filled, not flipped
        let filled = transition(fvg, &make_candle(3, 104.0, 104.5, 100.5, 102.0));
        assert!(filled.filled);
        assert_eq!(filled.kind, ConfluenceKind::Fvg);

        // close below the far edge: iFVG acting as resistance
        let flipped = transition(filled, &make_candle(4, 102.0, 102.5, 99.0, 100.0));
        assert_eq!(flipped.kind, ConfluenceKind::InverseFvg);
        assert_eq!(flipped.bias, Bias::Bearish);
        assert_eq!(flipped.flipped_at, Some(t(4)));
        assert_eq!(flipped.zone, fvg.zone, "history kept");

        // terminal
        let again = transition(flipped, &make_candle(5, 100.0, 110.0, 99.0, 109.0));
        assert_eq!(again, flipped);
    }

    #[test]
    fn partial_touch_does_not_fill() {
        let fvg = Confluence {
            kind:       ConfluenceKind::Fvg,
            bias:       Bias::Bullish,
            zone:       Zone { low: 101.0, high: 103.0 },
            formed_at:  t(2),
            filled:     false,
            flipped_at: None,
        };
        let next = transition(fvg, &make_candle(3, 104.0, 104.5, 102.0, 103.5));
        assert!(!next.filled);
    }

    #[test]
    fn order_block_from_consecutive_run_then_breaker() {
        let candles = vec![
            make_candle(0, 101.0, 101.5, 99.5, 100.0),  // bearish OB
            make_candle(1, 100.0, 101.2, 99.9, 101.0),
            make_candle(2, 101.0, 102.2, 100.9, 102.0),
            make_candle(3, 102.0, 103.2, 101.9, 103.0),
            make_candle(4, 103.0, 103.1, 98.0, 99.0),   // closes below the OB
        ];
        let found = detect(&candles, &quiet_cfg());
        let bb = found.iter().find(|c| c.formed_at == t(0)).unwrap();
        assert_eq!(bb.kind, ConfluenceKind::BreakerBlock);
        assert_eq!(bb.bias, Bias::Bearish);
        assert_eq!(bb.zone, Zone { low: 99.5, high: 101.5 });
        assert_eq!(bb.flipped_at, Some(t(4)));
    }

    #[test]
    fn short_run_is_not_an_order_block_without_atr_impulse() {
        let candles = vec![
            make_candle(0, 101.0, 101.5, 99.5, 100.0),
            make_candle(1, 100.0, 101.2, 99.9, 101.0),
            make_candle(2, 101.0, 101.1, 100.0, 100.2),
        ];
        let found = detect(&candles, &quiet_cfg());
        assert!(found.iter().all(|c| c.kind != ConfluenceKind::OrderBlock));
    }

    #[test]
    fn large_single_candle_move_qualifies_by_atr() {
        let mut candles: Vec<Candle> = (0..14)
            .map(|i| make_candle(i, 100.0, 100.5, 99.5, if i % 2 == 0 { 100.2 } else { 99.8 }))
            .collect();
        candles.push(make_candle(14, 100.0, 100.1, 99.6, 99.7));   // bearish OB
        candles.push(make_candle(15, 99.7, 106.0, 99.7, 105.8));   // impulsive
        candles.push(make_candle(16, 105.8, 106.0, 105.0, 105.2)); // bearish, ends run

        let cfg = ConfluenceConfig::default();
        let found = detect(&candles, &cfg);
        let ob = found
            .iter()
            .find(|c| c.kind == ConfluenceKind::OrderBlock && c.formed_at == t(14))
            .unwrap();
        assert_eq!(ob.bias, Bias::Bullish);
    }

    #[test]
    fn window_bounds_the_scan() {
        let mut candles = vec![
            make_candle(0, 100.0, 101.0, 99.0, 100.5),
            make_candle(1, 100.5, 106.0, 100.4, 105.5),
            make_candle(2, 105.5, 107.0, 103.0, 106.5),
        ];
        for i in 3..25 {
            candles.push(make_candle(i, 106.5, 106.6, 106.4, 106.5));
        }
        let found = detect(&candles, &quiet_cfg());
        assert!(found.iter().all(|c| c.formed_at > t(4)));
    }

    #[test]
    fn confluence_at_prefers_latest() {
        let mk = |i, low, high| Confluence {
            kind:       ConfluenceKind::Fvg,
            bias:       Bias::Bullish,
            zone:       Zone { low, high },
            formed_at:  t(i),
            filled:     false,
            flipped_at: None,
        };
        let list = vec![mk(1, 100.0, 105.0), mk(3, 102.0, 104.0), mk(4, 110.0, 111.0)];
        assert_eq!(confluence_at(&list, 103.0).unwrap().formed_at, t(3));
        assert!(confluence_at(&list, 107.0).is_none());
    }
}
