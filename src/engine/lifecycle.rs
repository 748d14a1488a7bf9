//! # engine::lifecycle — TradeLifecycleManager
//!
//! Monitoring tick (default ทุก 30s):
//!
//! ```text
//! 1. close_trade_<id> keys   → close_position(ticket) แล้วลบ key
//! 2. get_open_positions()    → ticket ยังอยู่: Submitted → Open
//! 3. ticket หายไป            → get_closed_position(ticket)
//!                              → Closed{tp|sl|manual} + quota + pattern stats (atomic)
//! ```
//!
//! สื่อสารกับ analysis loop ผ่าน Store เท่านั้น

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::resilience::{call_with_retry, RetryPolicy};
use crate::engine::session::SessionClock;
use crate::events::{EngineEvent, EventBus};
use crate::models::{CloseReason, Direction, Trade, TradeClosure, TradeStatus};
use crate::providers::ExecutionProvider;
use crate::store::{Store, CLOSE_TRADE_PREFIX};

/// Fills within this many ticks of tp / sl count as hitting the level
/// (same budget as the order's max deviation).
pub const CLOSE_TOLERANCE_TICKS: f64 = 20.0;

/// Infer why a position closed from where it exited. `tolerance` is a price
/// distance; an exit beyond the level always counts.
pub fn infer_close_reason(direction: Direction, exit: f64, tp: f64, sl: f64, tolerance: f64) -> CloseReason {
    match direction {
        Direction::Long => {
            if exit >= tp - tolerance {
                CloseReason::Tp
            } else if exit <= sl + tolerance {
                CloseReason::Sl
            } else {
                CloseReason::Manual
            }
        }
        Direction::Short => {
            if exit <= tp + tolerance {
                CloseReason::Tp
            } else if exit >= sl - tolerance {
                CloseReason::Sl
            } else {
                CloseReason::Manual
            }
        }
        Direction::None => CloseReason::Manual,
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleReport {
    pub manual_closes: usize,
    pub opened:        usize,
    pub closed:        usize,
    /// Positions missing from the bridge with no history yet
    pub unresolved:    usize,
    /// The bridge could not be read; nothing reconciled
    pub skipped:       bool,
}

// ─── Manager ──────────────────────────────────────────────────────────────────

pub struct TradeLifecycleManager {
    exec:   Arc<dyn ExecutionProvider>,
    store:  Arc<dyn Store>,
    clock:  SessionClock,
    policy: RetryPolicy,
    events: EventBus,
}

impl TradeLifecycleManager {
    pub fn new(
        exec:   Arc<dyn ExecutionProvider>,
        store:  Arc<dyn Store>,
        clock:  SessionClock,
        policy: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self { exec, store, clock, policy, events }
    }

    pub async fn run_cycle(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        let trades = match call_with_retry("open_trades", &self.policy, || self.store.open_trades()).await {
            Ok(t) => t,
            Err(err) => {
                warn!(error = %err, "lifecycle: cannot read open trades, skipping cycle");
                report.skipped = true;
                return report;
            }
        };

        // ── 1. Manual close requests ─────────────────────────────────────────
        let manual = self.process_manual_closes(&trades).await;
        report.manual_closes = manual.len();

        if trades.is_empty() {
            return report;
        }

        // ── 2. Live positions ────────────────────────────────────────────────
        let positions = match call_with_retry("get_open_positions", &self.policy, || {
            self.exec.get_open_positions()
        })
        .await
        {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "lifecycle: bridge unavailable, skipping reconciliation");
                report.skipped = true;
                return report;
            }
        };
        let live: HashSet<u64> = positions.iter().map(|p| p.ticket).collect();

        // ── 3. Reconcile ─────────────────────────────────────────────────────
        for trade in &trades {
            if live.contains(&trade.ticket) {
                if trade.status == TradeStatus::Submitted {
                    match call_with_retry("mark_trade_open", &self.policy, || {
                        self.store.mark_trade_open(trade.id)
                    })
                    .await
                    {
                        Ok(()) => {
                            report.opened += 1;
                            info!(asset = %trade.asset, ticket = trade.ticket, "📈 position open");
                        }
                        Err(err) => error!(ticket = trade.ticket, error = %err, "💾 mark_trade_open failed"),
                    }
                }
                continue;
            }

            match self.reconcile_closed(trade, manual.contains(&trade.id)).await {
                Some(true) => report.closed += 1,
                Some(false) => {}
                None => report.unresolved += 1,
            }
        }

        debug!(?report, "lifecycle cycle done");
        report
    }

    /// Returns the ids of trades for which a close order was sent this cycle.
    async fn process_manual_closes(&self, trades: &[Trade]) -> HashSet<Uuid> {
        let mut closed = HashSet::new();

        let keys = match call_with_retry("control_keys_with_prefix", &self.policy, || {
            self.store.control_keys_with_prefix(CLOSE_TRADE_PREFIX)
        })
        .await
        {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "lifecycle: cannot read manual close requests");
                return closed;
            }
        };

        for key in keys {
            let target = key
                .strip_prefix(CLOSE_TRADE_PREFIX)
                .and_then(|id| Uuid::parse_str(id).ok())
                .and_then(|id| trades.iter().find(|t| t.id == id));

            let Some(trade) = target else {
                // unknown or already closed trade: drop the stale request
                warn!(key = %key, "manual close for unknown / closed trade, dropping request");
                self.delete_key(&key).await;
                continue;
            };

            match call_with_retry("close_position", &self.policy, || {
                self.exec.close_position(trade.ticket)
            })
            .await
            {
                Ok(()) => {
                    info!(asset = %trade.asset, ticket = trade.ticket, "🛑 manual close sent");
                    closed.insert(trade.id);
                    self.delete_key(&key).await;
                }
                Err(err) => {
                    // key stays, retried next cycle
                    error!(ticket = trade.ticket, error = %err, "manual close failed");
                }
            }
        }
        closed
    }

    /// `Some(true)` closed now, `Some(false)` already closed elsewhere,
    /// `None` no history available yet.
    async fn reconcile_closed(&self, trade: &Trade, manual: bool) -> Option<bool> {
        let history = match call_with_retry("get_closed_position", &self.policy, || {
            self.exec.get_closed_position(trade.ticket)
        })
        .await
        {
            Ok(Some(h)) => h,
            Ok(None) => {
                warn!(ticket = trade.ticket, "position gone but no deal history yet");
                return None;
            }
            Err(err) => {
                warn!(ticket = trade.ticket, error = %err, "cannot read deal history");
                return None;
            }
        };

        let reason = if manual {
            CloseReason::Manual
        } else {
            let tolerance = self.close_tolerance(&trade.asset).await;
            infer_close_reason(trade.direction, history.exit_price, trade.tp, trade.sl, tolerance)
        };

        let closure = TradeClosure {
            trade_id:    trade.id,
            asset:       trade.asset.clone(),
            pattern:     trade.pattern.clone(),
            exit_price:  history.exit_price,
            exit_time:   history.exit_time,
            pnl:         history.profit,
            reason,
            realized_rr: trade.realized_rr(history.exit_price),
            day:         self.clock.civil_date(history.exit_time),
        };

        match call_with_retry("close_trade", &self.policy, || self.store.close_trade(&closure)).await {
            Ok(true) => {
                info!(
                    asset = %trade.asset,
                    ticket = trade.ticket,
                    reason = reason.as_str(),
                    pnl = history.profit,
                    "🏁 trade closed"
                );
                self.events.publish(&EngineEvent::TradeClosed {
                    trade_id:   trade.id,
                    asset:      trade.asset.clone(),
                    ticket:     trade.ticket,
                    exit_price: history.exit_price,
                    pnl:        history.profit,
                    reason,
                });
                Some(true)
            }
            Ok(false) => Some(false),
            Err(err) => {
                error!(ticket = trade.ticket, error = %err, "💾 close_trade failed, retried next cycle");
                None
            }
        }
    }

    /// Price distance of [`CLOSE_TOLERANCE_TICKS`] for `asset`; exact levels
    /// only when the symbol spec cannot be read.
    async fn close_tolerance(&self, asset: &str) -> f64 {
        match call_with_retry("get_symbol_pip_value", &self.policy, || {
            self.exec.get_symbol_pip_value(asset)
        })
        .await
        {
            Ok(spec) if spec.pip_size.is_finite() && spec.pip_size > 0.0 => {
                spec.pip_size * CLOSE_TOLERANCE_TICKS
            }
            Ok(_) => 0.0,
            Err(err) => {
                warn!(asset, error = %err, "symbol spec unavailable, matching exact tp / sl");
                0.0
            }
        }
    }

    async fn delete_key(&self, key: &str) {
        if let Err(err) = call_with_retry("control_delete", &self.policy, || self.store.control_delete(key)).await {
            error!(key, error = %err, "💾 control_delete failed");
        }
    }
}

/// Monitoring loop. Never overlaps itself; stops when `shutdown` flips.
pub async fn run_monitor_loop(
    manager:      TradeLifecycleManager,
    period:       Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "👁️ monitoring loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                manager.run_cycle().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("monitoring loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_from_exit_price() {
        // gold, 0.01 tick → 0.2 tolerance; long: tp 2010, sl 1995
        let tol = 0.01 * CLOSE_TOLERANCE_TICKS;
        assert_eq!(infer_close_reason(Direction::Long, 2010.0, 2010.0, 1995.0, tol), CloseReason::Tp);
        assert_eq!(infer_close_reason(Direction::Long, 2009.85, 2010.0, 1995.0, tol), CloseReason::Tp);
        assert_eq!(infer_close_reason(Direction::Long, 2011.0, 2010.0, 1995.0, tol), CloseReason::Tp);
        assert_eq!(infer_close_reason(Direction::Long, 1994.0, 2010.0, 1995.0, tol), CloseReason::Sl);
        assert_eq!(infer_close_reason(Direction::Long, 2009.0, 2010.0, 1995.0, tol), CloseReason::Manual);
        // short: tp 1990, sl 2005
        assert_eq!(infer_close_reason(Direction::Short, 1989.0, 1990.0, 2005.0, tol), CloseReason::Tp);
        assert_eq!(infer_close_reason(Direction::Short, 2005.0, 1990.0, 2005.0, tol), CloseReason::Sl);
        assert_eq!(infer_close_reason(Direction::Short, 2004.9, 1990.0, 2005.0, tol), CloseReason::Sl);
        assert_eq!(infer_close_reason(Direction::Short, 1998.0, 1990.0, 2005.0, tol), CloseReason::Manual);
    }

    #[test]
    fn manual_exit_near_tp_on_index_stays_manual() {
        // US100 near 18000: a relative 0.1% band would be 18 points wide
        let tol = 0.01 * CLOSE_TOLERANCE_TICKS;
        assert_eq!(infer_close_reason(Direction::Long, 17985.0, 18000.0, 17900.0, tol), CloseReason::Manual);
        assert_eq!(infer_close_reason(Direction::Long, 17999.9, 18000.0, 17900.0, tol), CloseReason::Tp);
        assert_eq!(infer_close_reason(Direction::Short, 17915.0, 17900.0, 18050.0, tol), CloseReason::Manual);
    }

    #[test]
    fn zero_tolerance_needs_the_level_or_beyond() {
        assert_eq!(infer_close_reason(Direction::Long, 2009.99, 2010.0, 1995.0, 0.0), CloseReason::Manual);
        assert_eq!(infer_close_reason(Direction::Long, 1994.5, 2010.0, 1995.0, 0.0), CloseReason::Sl);
    }
}
