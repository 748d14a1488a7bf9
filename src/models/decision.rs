//! # models::decision
//!
//! Decision ที่ได้จาก Decision Provider (Claude / Groq) และ Signal ที่ถูก
//! บันทึกลง Store
//!
//! Invariant: `trade_valid = false` ⇒ entry / sl / tp / rr ต้องเป็น null ทั้งหมด

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long  => "long",
            Direction::Short => "short",
            Direction::None  => "none",
        }
    }
}

impl FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" | "l"   => Ok(Direction::Long),
            "short" | "sell" | "s" => Ok(Direction::Short),
            "none" | "n" | ""      => Ok(Direction::None),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Reversal,
    Continuation,
    Unclear,
    None,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Reversal     => "reversal",
            Scenario::Continuation => "continuation",
            Scenario::Unclear      => "unclear",
            Scenario::None         => "none",
        }
    }
}

impl FromStr for Scenario {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reversal" | "r"     => Ok(Scenario::Reversal),
            "continuation" | "c" => Ok(Scenario::Continuation),
            "unclear" | "u"      => Ok(Scenario::Unclear),
            "none" | "n" | ""    => Ok(Scenario::None),
            other => Err(format!("unknown scenario '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullish" | "b"             => Ok(Sentiment::Bullish),
            "bearish" | "be" | "bear"   => Ok(Sentiment::Bearish),
            "neutral" | "n" | ""        => Ok(Sentiment::Neutral),
            other => Err(format!("unknown sentiment '{other}'")),
        }
    }
}

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub asset:            String,
    pub direction:        Direction,
    pub scenario:         Scenario,
    /// 0–100
    pub confidence:       u8,
    pub entry_price:      Option<f64>,
    pub sl_price:         Option<f64>,
    pub tp_price:         Option<f64>,
    pub rr_ratio:         Option<f64>,
    #[serde(default)]
    pub confluences_used: Vec<String>,
    pub sweep_level:      Option<String>,
    #[serde(default)]
    pub news_sentiment:   Sentiment,
    #[serde(default)]
    pub social_sentiment: Sentiment,
    pub trade_valid:      bool,
    #[serde(default)]
    pub reason:           String,
    #[serde(default)]
    pub provider_used:    String,
}

impl Decision {
    /// Synthetic "no trade" decision (out of session, providers down, …).
    pub fn no_trade(asset: &str, reason: &str, provider_used: &str) -> Self {
        Self {
            asset:            asset.to_string(),
            direction:        Direction::None,
            scenario:         Scenario::None,
            confidence:       0,
            entry_price:      None,
            sl_price:         None,
            tp_price:         None,
            rr_ratio:         None,
            confluences_used: Vec::new(),
            sweep_level:      None,
            news_sentiment:   Sentiment::Neutral,
            social_sentiment: Sentiment::Neutral,
            trade_valid:      false,
            reason:           reason.to_string(),
            provider_used:    provider_used.to_string(),
        }
    }

    /// Null the price levels.
    pub fn clear_levels(&mut self) {
        self.entry_price = None;
        self.sl_price    = None;
        self.tp_price    = None;
        self.rr_ratio    = None;
    }

    /// A tradeable decision needs a direction and every level present and finite.
    pub fn is_complete_trade(&self) -> bool {
        let finite = |v: Option<f64>| v.map(f64::is_finite).unwrap_or(false);
        self.direction != Direction::None
            && finite(self.entry_price)
            && finite(self.sl_price)
            && finite(self.tp_price)
            && finite(self.rr_ratio)
    }

    /// `tp > entry > sl` for a long, `tp < entry < sl` for a short.
    pub fn levels_ordered(&self) -> bool {
        let (Some(entry), Some(sl), Some(tp)) = (self.entry_price, self.sl_price, self.tp_price) else {
            return false;
        };
        match self.direction {
            Direction::Long  => tp > entry && entry > sl,
            Direction::Short => tp < entry && entry < sl,
            Direction::None  => false,
        }
    }

    /// Holds the null invariant: not tradeable ⇒ no levels. A tradeable
    /// decision also needs its stop and target on the right side of entry.
    pub fn levels_consistent(&self) -> bool {
        if self.trade_valid {
            self.is_complete_trade() && self.levels_ordered()
        } else {
            self.entry_price.is_none()
                && self.sl_price.is_none()
                && self.tp_price.is_none()
                && self.rr_ratio.is_none()
        }
    }

    /// Reward / risk from the actual prices (ignores the provider's `rr_ratio`).
    pub fn recomputed_rr(&self) -> Option<f64> {
        let (entry, sl, tp) = (self.entry_price?, self.sl_price?, self.tp_price?);
        let risk = (entry - sl).abs();
        if risk <= 0.0 {
            return None;
        }
        Some((tp - entry).abs() / risk)
    }
}

// ─── Signal ───────────────────────────────────────────────────────────────────

/// A persisted Decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id:        Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub decision:  Decision,
    pub executed:  bool,
}

impl Signal {
    pub fn new(decision: Decision, timestamp: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), timestamp, decision, executed: false }
    }
}
