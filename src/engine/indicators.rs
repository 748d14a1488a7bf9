//! # engine::indicators
//!
//! Momentum / trend context for the decision request. All functions return
//! `None` when there is not enough history.

use serde::Serialize;

use crate::models::Candle;

pub const ATR_PERIOD: usize = 14;
pub const RSI_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    pub line:      f64,
    pub signal:    f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi14:  Option<f64>,
    pub macd:   Option<Macd>,
    pub ema20:  Option<f64>,
    pub ema50:  Option<f64>,
    pub ema200: Option<f64>,
    pub atr14:  Option<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Self {
            rsi14:  rsi(&closes, RSI_PERIOD),
            macd:   macd(&closes),
            ema20:  ema(&closes, 20),
            ema50:  ema(&closes, 50),
            ema200: ema(&closes, 200),
            atr14:  atr(candles, ATR_PERIOD),
        }
    }
}

/// Full EMA series seeded with the SMA of the first `period` values.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Wilder-smoothed RSI.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in closes[..=period].windows(2) {
        let d = w[1] - w[0];
        if d >= 0.0 { gain += d } else { loss -= d }
    }
    let p = period as f64;
    let mut avg_gain = gain / p;
    let mut avg_loss = loss / p;
    for w in closes[period..].windows(2) {
        let d = w[1] - w[0];
        let (g, l) = if d >= 0.0 { (d, 0.0) } else { (0.0, -d) };
        avg_gain = (avg_gain * (p - 1.0) + g) / p;
        avg_loss = (avg_loss * (p - 1.0) + l) / p;
    }
    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(12, 26, 9).
pub fn macd(closes: &[f64]) -> Option<Macd> {
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    if slow.is_empty() {
        return None;
    }
    // fast starts 14 samples earlier than slow
    let offset = fast.len() - slow.len();
    let line: Vec<f64> = slow
        .iter()
        .enumerate()
        .map(|(i, s)| fast[i + offset] - s)
        .collect();
    let signal = ema(&line, 9)?;
    let last = *line.last()?;
    Some(Macd { line: last, signal, histogram: last - signal })
}

/// Mean true range of the last `period` candles.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.is_empty() {
        return None;
    }
    let start = candles.len().saturating_sub(period);
    let trs: Vec<f64> = (start..candles.len())
        .map(|i| {
            let prev = if i > 0 { Some(candles[i - 1].close) } else { None };
            candles[i].true_range(prev)
        })
        .collect();
    Some(trs.iter().sum::<f64>() / trs.len() as f64)
}
