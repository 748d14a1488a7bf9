//! # models::levels
//!
//! Key levels (session / previous-day extremes) and the sweep events raised
//! against them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── Level Name ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelName {
    AsiaHigh,
    AsiaLow,
    LondonHigh,
    LondonLow,
    PrevDayHigh,
    PrevDayLow,
}

impl LevelName {
    pub const ALL: [LevelName; 6] = [
        LevelName::AsiaHigh,
        LevelName::AsiaLow,
        LevelName::LondonHigh,
        LevelName::LondonLow,
        LevelName::PrevDayHigh,
        LevelName::PrevDayLow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LevelName::AsiaHigh    => "asia_high",
            LevelName::AsiaLow     => "asia_low",
            LevelName::LondonHigh  => "london_high",
            LevelName::LondonLow   => "london_low",
            LevelName::PrevDayHigh => "prev_day_high",
            LevelName::PrevDayLow  => "prev_day_low",
        }
    }

    /// High levels are swept from below, low levels from above.
    pub fn is_high(&self) -> bool {
        matches!(self, LevelName::AsiaHigh | LevelName::LondonHigh | LevelName::PrevDayHigh)
    }
}

impl std::fmt::Display for LevelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Key Levels ───────────────────────────────────────────────────────────────

/// A frozen extreme. `frozen_at` is the instant its source window closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyLevel {
    pub price:     f64,
    pub frozen_at: DateTime<Utc>,
}

/// Levels for one civil trading day. A `None` field means the source window
/// has not closed yet (or never had a candle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLevelSet {
    pub day:           NaiveDate,
    pub asia_high:     Option<KeyLevel>,
    pub asia_low:      Option<KeyLevel>,
    pub london_high:   Option<KeyLevel>,
    pub london_low:    Option<KeyLevel>,
    pub prev_day_high: Option<KeyLevel>,
    pub prev_day_low:  Option<KeyLevel>,
}

impl KeyLevelSet {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            asia_high:     None,
            asia_low:      None,
            london_high:   None,
            london_low:    None,
            prev_day_high: None,
            prev_day_low:  None,
        }
    }

    pub fn get(&self, name: LevelName) -> Option<KeyLevel> {
        match name {
            LevelName::AsiaHigh    => self.asia_high,
            LevelName::AsiaLow     => self.asia_low,
            LevelName::LondonHigh  => self.london_high,
            LevelName::LondonLow   => self.london_low,
            LevelName::PrevDayHigh => self.prev_day_high,
            LevelName::PrevDayLow  => self.prev_day_low,
        }
    }

    /// Frozen levels only, in a stable order.
    pub fn frozen(&self) -> impl Iterator<Item = (LevelName, KeyLevel)> + '_ {
        LevelName::ALL
            .into_iter()
            .filter_map(|name| self.get(name).map(|lvl| (name, lvl)))
    }
}

// ─── Sweep Event ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepReaction {
    ReversalCandidate,
    ContinuationCandidate,
}

impl SweepReaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepReaction::ReversalCandidate     => "reversal_candidate",
            SweepReaction::ContinuationCandidate => "continuation_candidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepEvent {
    pub level_name:       LevelName,
    pub level_price:      f64,
    pub breach_timestamp: DateTime<Utc>,
    pub reaction_tag:     SweepReaction,
}
