//! # models::confluence
//!
//! Gap / order-block structures. A confluence is never removed once formed:
//! breaking it flips `kind` (FVG → iFVG, OrderBlock → BreakerBlock) and its
//! bias, and records when that happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfluenceKind {
    Fvg,
    InverseFvg,
    OrderBlock,
    BreakerBlock,
}

impl ConfluenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfluenceKind::Fvg          => "FVG",
            ConfluenceKind::InverseFvg   => "iFVG",
            ConfluenceKind::OrderBlock   => "OB",
            ConfluenceKind::BreakerBlock => "BB",
        }
    }
}

/// Bullish = acts as support, Bearish = acts as resistance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
}

impl Bias {
    pub fn opposite(self) -> Self {
        match self {
            Bias::Bullish => Bias::Bearish,
            Bias::Bearish => Bias::Bullish,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Bias::Bullish => "support",
            Bias::Bearish => "resistance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub low:  f64,
    pub high: f64,
}

impl Zone {
    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confluence {
    pub kind:       ConfluenceKind,
    pub bias:       Bias,
    pub zone:       Zone,
    pub formed_at:  DateTime<Utc>,
    /// FVG: range fully covered by a later candle. OB: broken.
    pub filled:     bool,
    pub flipped_at: Option<DateTime<Utc>>,
}

impl Confluence {
    pub fn label(&self) -> String {
        format!(
            "{} {} {:.2}-{:.2}",
            self.kind.as_str(),
            self.bias.role(),
            self.zone.low,
            self.zone.high
        )
    }
}
