//! # models::trade
//!
//! Trade lifecycle records and the execution-bridge shapes they are built from.
//!
//! ## แยกกันอย่างไร
//! `Position`       = Position ที่เปิดอยู่จริงใน MT5 ณ ตอนนี้ (อ่านจาก Bridge)
//! `Trade`          = บันทึกของเราเอง อ้างอิง Signal ที่สร้างมัน
//! `TradeClosure`   = ผลลัพธ์ตอนปิด ใช้ทำ Transaction ปิด Trade + Quota + Stats

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::decision::{Decision, Direction};

// ─── TradeStatus ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Order ส่งแล้ว ได้ Ticket แต่ยังไม่เห็นใน open positions
    Submitted,
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Submitted => "submitted",
            TradeStatus::Open      => "open",
            TradeStatus::Closed    => "closed",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(TradeStatus::Submitted),
            "open"      => Ok(TradeStatus::Open),
            "closed"    => Ok(TradeStatus::Closed),
            other => Err(format!("unknown trade status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Tp,
    Sl,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Tp     => "tp",
            CloseReason::Sl     => "sl",
            CloseReason::Manual => "manual",
        }
    }
}

impl FromStr for CloseReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tp"     => Ok(CloseReason::Tp),
            "sl"     => Ok(CloseReason::Sl),
            "manual" => Ok(CloseReason::Manual),
            other => Err(format!("unknown close reason '{other}'")),
        }
    }
}

// ─── Trade ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id:            Uuid,
    pub signal_id:     Uuid,
    pub asset:         String,
    pub direction:     Direction,
    /// Scenario of the originating decision; key for pattern statistics.
    pub pattern:       String,
    pub entry_price:   f64,
    pub entry_time:    DateTime<Utc>,
    pub exit_price:    Option<f64>,
    pub exit_time:     Option<DateTime<Utc>>,
    pub sl:            f64,
    pub tp:            f64,
    pub lot_size:      f64,
    /// Ticket number จาก MT5
    pub ticket:        u64,
    pub pnl:           Option<f64>,
    pub status:        TradeStatus,
    pub closed_reason: Option<CloseReason>,
}

impl Trade {
    /// บันทึก Trade ใหม่หลังจาก MT5 คืน Ticket (สถานะ Submitted)
    pub fn submitted(
        signal_id:  Uuid,
        decision:   &Decision,
        order:      &OrderRequest,
        ticket:     u64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id:            Uuid::new_v4(),
            signal_id,
            asset:         order.asset.clone(),
            direction:     order.direction,
            pattern:       decision.scenario.as_str().to_string(),
            entry_price:   order.entry,
            entry_time,
            exit_price:    None,
            exit_time:     None,
            sl:            order.sl,
            tp:            order.tp,
            lot_size:      order.lot,
            ticket,
            pnl:           None,
            status:        TradeStatus::Submitted,
            closed_reason: None,
        }
    }

    /// Realised R multiple, signed (a full stop-out is −1).
    pub fn realized_rr(&self, exit_price: f64) -> f64 {
        let risk = (self.entry_price - self.sl).abs();
        if risk <= 0.0 {
            return 0.0;
        }
        let moved = match self.direction {
            Direction::Long  => exit_price - self.entry_price,
            Direction::Short => self.entry_price - exit_price,
            Direction::None  => 0.0,
        };
        moved / risk
    }
}

/// Everything the store needs to close a trade atomically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeClosure {
    pub trade_id:    Uuid,
    pub asset:       String,
    pub pattern:     String,
    pub exit_price:  f64,
    pub exit_time:   DateTime<Utc>,
    pub pnl:         f64,
    pub reason:      CloseReason,
    pub realized_rr: f64,
    /// Civil date of the exit; the quota row to increment.
    pub day:         NaiveDate,
}

// ─── Pattern Statistics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub pattern:   String,
    pub asset:     String,
    pub total:     u32,
    pub wins:      u32,
    pub losses:    u32,
    /// Percent, 0–100
    pub win_rate:  f64,
    pub avg_rr:    f64,
    pub total_pnl: f64,
}

impl PatternStats {
    pub fn new(pattern: &str, asset: &str) -> Self {
        Self {
            pattern:   pattern.to_string(),
            asset:     asset.to_string(),
            total:     0,
            wins:      0,
            losses:    0,
            win_rate:  0.0,
            avg_rr:    0.0,
            total_pnl: 0.0,
        }
    }

    pub fn record(&mut self, pnl: f64, realized_rr: f64) {
        let prev_total = self.total as f64;
        self.total += 1;
        if pnl > 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl += pnl;
        self.avg_rr = (self.avg_rr * prev_total + realized_rr) / self.total as f64;
        self.win_rate = self.wins as f64 * 100.0 / self.total as f64;
    }
}

// ─── Execution Bridge Shapes ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub asset:     String,
    pub direction: Direction,
    pub lot:       f64,
    pub entry:     f64,
    pub sl:        f64,
    pub tp:        f64,
    pub comment:   String,
}

/// Position ที่เปิดอยู่ใน MT5
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket:     u64,
    pub symbol:     String,
    pub volume:     f64,
    pub price_open: f64,
    pub sl:         f64,
    pub tp:         f64,
    pub profit:     f64,
}

/// Deal history of a position that is no longer open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub ticket:     u64,
    pub exit_price: f64,
    pub exit_time:  DateTime<Utc>,
    pub profit:     f64,
}

/// Live contract data per instrument. `pip_value` is the account-currency
/// value of one `pip_size` move for one lot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub pip_size:    f64,
    pub pip_value:   f64,
    pub volume_min:  f64,
    pub volume_max:  f64,
    pub volume_step: f64,
}
