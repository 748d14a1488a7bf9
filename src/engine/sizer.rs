//! # engine::sizer — PositionSizer
//!
//! `lots = capital × risk_fraction / (stop_pips × pip_value)`
//!
//! - `stop_pips = stop distance / pip_size`, direction-aware (long: entry − sl)
//! - `pip_value` มาจาก Bridge ทุกครั้ง ห้าม hardcode
//! - ปัดลงตาม `volume_step`, cap ที่ `volume_max`; ต่ำกว่า `volume_min` → ไม่เทรด
//!   (ปัดลงเสมอ ความเสี่ยงจริงจึงไม่เกิน risk_fraction)

use serde::Serialize;

use crate::error::SizingError;
use crate::models::{Direction, SymbolSpec};

/// Float slack when flooring to the volume step (0.3 / 0.1 = 2.9999…).
const STEP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LotSize {
    pub lots:        f64,
    pub stop_pips:   f64,
    /// capital × risk_fraction
    pub risk_budget: f64,
    /// lots × stop_pips × pip_value (≤ risk_budget)
    pub risk_amount: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    risk_fraction: f64,
}

impl PositionSizer {
    pub fn new(risk_fraction: f64) -> Self {
        Self { risk_fraction }
    }

    pub fn size(
        &self,
        capital:   f64,
        direction: Direction,
        entry:     f64,
        sl:        f64,
        spec:      &SymbolSpec,
    ) -> Result<LotSize, SizingError> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(SizingError::InvalidAccount(capital));
        }
        if !(spec.pip_size.is_finite() && spec.pip_size > 0.0) {
            return Err(SizingError::InvalidSymbol(format!("pip_size {}", spec.pip_size)));
        }
        if !(spec.pip_value.is_finite() && spec.pip_value > 0.0) {
            return Err(SizingError::InvalidSymbol(format!("pip_value {}", spec.pip_value)));
        }

        let distance = match direction {
            Direction::Long  => entry - sl,
            Direction::Short => sl - entry,
            Direction::None  => return Err(SizingError::NonPositiveStop(0.0)),
        };
        if !distance.is_finite() || distance <= 0.0 {
            return Err(SizingError::NonPositiveStop(distance));
        }

        let stop_pips = distance / spec.pip_size;
        let risk_budget = capital * self.risk_fraction;
        let raw = risk_budget / (stop_pips * spec.pip_value);

        let mut lots = if spec.volume_step > 0.0 {
            ((raw / spec.volume_step) + STEP_EPSILON).floor() * spec.volume_step
        } else {
            raw
        };
        if spec.volume_max > 0.0 {
            lots = lots.min(spec.volume_max);
        }
        // strip float noise from the step multiplication (0.1 × 3 = 0.30000000000000004)
        lots = (lots * 1e8).round() / 1e8;

        if !lots.is_finite() || lots <= 0.0 || lots < spec.volume_min {
            return Err(SizingError::BelowMinimumVolume { lots, min: spec.volume_min });
        }

        Ok(LotSize {
            lots,
            stop_pips,
            risk_budget,
            risk_amount: lots * stop_pips * spec.pip_value,
        })
    }
}
