//! # engine::sweep — SweepDetector
//!
//! For every frozen key level: find the first candle (after the level froze,
//! same civil day) that trades beyond it, then look at that candle and up to
//! `lookahead` followers in the same session phase. A candle that gaps past
//! the level without touching it still counts: price sits on the origin side
//! when a level freezes, so the first candle beyond it is the breach.
//!
//! - close back on the origin side            → `reversal_candidate`
//! - close beyond the level by `margin × ATR` → `continuation_candidate`
//! - neither (yet)                            → no event
//!
//! The tag is advisory. It is recomputed from the window on every candle, so a
//! breach can move from continuation to reversal while its look-ahead is open.

use crate::engine::indicators::{atr, ATR_PERIOD};
use crate::engine::session::SessionClock;
use crate::models::{Candle, KeyLevel, KeyLevelSet, LevelName, SweepEvent, SweepReaction};

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Candles inspected after the breach candle
    pub lookahead:        usize,
    /// Continuation margin in ATR multiples
    pub continuation_atr: f64,
    pub atr_period:       usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { lookahead: 3, continuation_atr: 0.25, atr_period: ATR_PERIOD }
    }
}

pub fn detect(
    levels:  &KeyLevelSet,
    candles: &[Candle],
    clock:   &SessionClock,
    cfg:     &SweepConfig,
) -> Vec<SweepEvent> {
    let margin = cfg.continuation_atr * atr(candles, cfg.atr_period).unwrap_or(0.0);

    let mut events: Vec<SweepEvent> = levels
        .frozen()
        .filter_map(|(name, level)| classify(name, level, levels, candles, clock, cfg, margin))
        .collect();

    events.sort_by_key(|e| e.breach_timestamp);
    events
}

/// Level of the most recent sweep, if any. One candle can sweep several
/// levels; a reversal beats a continuation, then the outermost level wins.
pub fn latest_level(events: &[SweepEvent]) -> Option<LevelName> {
    events
        .iter()
        .max_by(|a, b| {
            a.breach_timestamp
                .cmp(&b.breach_timestamp)
                .then_with(|| is_reversal(a).cmp(&is_reversal(b)))
                .then_with(|| outerness(a).total_cmp(&outerness(b)))
        })
        .map(|e| e.level_name)
}

fn is_reversal(e: &SweepEvent) -> bool {
    e.reaction_tag == SweepReaction::ReversalCandidate
}

fn outerness(e: &SweepEvent) -> f64 {
    if e.level_name.is_high() { e.level_price } else { -e.level_price }
}

fn classify(
    name:    LevelName,
    level:   KeyLevel,
    levels:  &KeyLevelSet,
    candles: &[Candle],
    clock:   &SessionClock,
    cfg:     &SweepConfig,
    margin:  f64,
) -> Option<SweepEvent> {
    let price = level.price;
    let high_side = name.is_high();

    let eligible = |c: &Candle| {
        c.open_time() >= level.frozen_at && clock.civil_date(c.open_time()) == levels.day
    };
    let crosses = |c: &Candle| if high_side { c.high > price } else { c.low < price };

    let breach_idx = candles.iter().position(|c| eligible(c) && crosses(c))?;
    let breach = &candles[breach_idx];
    let breach_phase = clock.phase(breach.open_time());

    let inspected = candles[breach_idx..]
        .iter()
        .take(cfg.lookahead + 1)
        .take_while(|c| {
            clock.phase(c.open_time()) == breach_phase
                && clock.civil_date(c.open_time()) == levels.day
        });

    let mut continued = false;
    for c in inspected {
        let back_inside = if high_side { c.close < price } else { c.close > price };
        if back_inside {
            return Some(event(name, price, breach, SweepReaction::ReversalCandidate));
        }
        let beyond = if high_side { c.close > price + margin } else { c.close < price - margin };
        continued |= beyond;
    }

    continued.then(|| event(name, price, breach, SweepReaction::ContinuationCandidate))
}

fn event(name: LevelName, price: f64, breach: &Candle, tag: SweepReaction) -> SweepEvent {
    SweepEvent {
        level_name:       name,
        level_price:      price,
        breach_timestamp: breach.time,
        reaction_tag:     tag,
    }
}
