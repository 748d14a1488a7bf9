//! # engine::gate — SignalGate
//!
//! ชั้นกั้นก่อนยิง Order ตามลำดับ:
//! 1. **Session**   — นอก 14:30–21:00 → synthetic `direction=none` (ไม่เรียก Router เลย)
//! 2. **Persist**   — บันทึก Decision เป็น Signal (ล้มเหลว → log แล้วตรวจต่อ แต่ไม่ยิง Order)
//! 3. **Tradeable** — `trade_valid=false` หยุดตรงนี้
//! 4. **Dedup**     — (asset, direction, sweep_level) ซ้ำภายใน 15 นาที
//! 5. **Quota**     — ปิดไปแล้ว ≥ 2 trades วันนี้ (civil day)
//! 6. **RR floor**  — rr คำนวณใหม่จากราคาต้อง ≥ 1.5
//!
//! tp / sl ผิดฝั่งของ entry → `InvalidDecisionFormat`

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::engine::resilience::{call_with_retry, RetryPolicy};
use crate::engine::session::SessionClock;
use crate::error::GateRejection;
use crate::models::{Decision, Signal};
use crate::store::Store;

pub const REASON_OUT_OF_SESSION: &str = "out_of_session";

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub dedup_window:              Duration,
    /// Closed trades per (asset, civil day)
    pub max_closed_trades_per_day: u32,
    pub min_rr:                    f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            dedup_window:              Duration::minutes(15),
            max_closed_trades_per_day: 2,
            min_rr:                    1.5,
        }
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub signal:    Signal,
    /// False when the store could not be written (the loop carries on).
    pub persisted: bool,
    pub verdict:   Result<(), GateRejection>,
}

// ─── Gate ─────────────────────────────────────────────────────────────────────

pub struct SignalGate {
    store:  Arc<dyn Store>,
    clock:  SessionClock,
    cfg:    GateConfig,
    policy: RetryPolicy,
}

impl SignalGate {
    pub fn new(store: Arc<dyn Store>, clock: SessionClock, cfg: GateConfig, policy: RetryPolicy) -> Self {
        Self { store, clock, cfg, policy }
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    /// Step 1. `Err` carries the synthetic no-trade decision.
    pub fn session_check(&self, asset: &str, ts: DateTime<Utc>) -> Result<(), Decision> {
        if self.clock.in_trading_window(ts) {
            Ok(())
        } else {
            Err(Decision::no_trade(asset, REASON_OUT_OF_SESSION, "none"))
        }
    }

    /// Steps 2–6 for a routed decision stamped at `at` (candle close time).
    pub async fn admit(&self, decision: Decision, at: DateTime<Utc>) -> GateOutcome {
        let signal = Signal::new(decision, at);

        let persisted = match call_with_retry("save_signal", &self.policy, || {
            self.store.save_signal(&signal)
        })
        .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(asset = %signal.decision.asset, error = %err, "💾 signal not persisted");
                false
            }
        };

        let mut verdict = self.check(&signal).await;
        // a trade row references its signal; without one the position would be untracked
        if verdict.is_ok() && !persisted {
            verdict = Err(GateRejection::StoreUnavailable("signal not persisted".into()));
        }
        match &verdict {
            Ok(()) => info!(
                asset = %signal.decision.asset,
                direction = signal.decision.direction.as_str(),
                confidence = signal.decision.confidence,
                "✅ signal passed gate"
            ),
            Err(GateRejection::NotTradeable(_)) => {}
            Err(rejection) => warn!(
                asset = %signal.decision.asset,
                rejection = %rejection,
                "🚫 signal blocked"
            ),
        }

        GateOutcome { signal, persisted, verdict }
    }

    async fn check(&self, signal: &Signal) -> Result<(), GateRejection> {
        let d = &signal.decision;

        if !d.trade_valid {
            return Err(GateRejection::NotTradeable(d.reason.clone()));
        }
        if !d.levels_consistent() {
            return Err(GateRejection::InvalidDecisionFormat);
        }

        // ── Dedup ─────────────────────────────────────────────────────────────
        let since = signal.timestamp - self.cfg.dedup_window;
        let duplicate = call_with_retry("find_recent_signal", &self.policy, || {
            self.store.find_recent_signal(
                &d.asset,
                d.direction,
                d.sweep_level.as_deref(),
                since,
                signal.id,
            )
        })
        .await
        .map_err(|e| GateRejection::StoreUnavailable(e.to_string()))?;
        if duplicate.is_some() {
            return Err(GateRejection::DuplicateSignal);
        }

        // ── Quota ─────────────────────────────────────────────────────────────
        let day = self.clock.civil_date(signal.timestamp);
        let closed = call_with_retry("closed_trades_on", &self.policy, || {
            self.store.closed_trades_on(&d.asset, day)
        })
        .await
        .map_err(|e| GateRejection::StoreUnavailable(e.to_string()))?;
        if closed >= self.cfg.max_closed_trades_per_day {
            return Err(GateRejection::QuotaExceeded {
                closed,
                max: self.cfg.max_closed_trades_per_day,
            });
        }

        // ── RR floor ──────────────────────────────────────────────────────────
        match d.recomputed_rr() {
            Some(rr) if rr >= self.cfg.min_rr => Ok(()),
            Some(rr) => Err(GateRejection::NotTradeable(format!(
                "rr {rr:.2} below {:.2}",
                self.cfg.min_rr
            ))),
            None => Err(GateRejection::NotTradeable("zero risk distance".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::ProviderError;
    use crate::models::{Direction, LogEntry, PatternStats, Scenario, Trade, TradeClosure};
    use crate::store::MemoryStore;

    /// MemoryStore whose signal writes always fail.
    struct SignalWritesFail(MemoryStore);

    #[async_trait]
    impl Store for SignalWritesFail {
        async fn save_signal(&self, _signal: &Signal) -> Result<(), ProviderError> {
            Err(ProviderError::Transient("connection reset".into()))
        }
        async fn mark_signal_executed(&self, id: Uuid) -> Result<(), ProviderError> {
            self.0.mark_signal_executed(id).await
        }
        async fn find_recent_signal(
            &self,
            asset:       &str,
            direction:   Direction,
            sweep_level: Option<&str>,
            since:       DateTime<Utc>,
            exclude:     Uuid,
        ) -> Result<Option<Signal>, ProviderError> {
            self.0.find_recent_signal(asset, direction, sweep_level, since, exclude).await
        }
        async fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>, ProviderError> {
            self.0.recent_signals(limit).await
        }
        async fn save_trade(&self, trade: &Trade) -> Result<(), ProviderError> {
            self.0.save_trade(trade).await
        }
        async fn open_trades(&self) -> Result<Vec<Trade>, ProviderError> {
            self.0.open_trades().await
        }
        async fn mark_trade_open(&self, id: Uuid) -> Result<(), ProviderError> {
            self.0.mark_trade_open(id).await
        }
        async fn close_trade(&self, closure: &TradeClosure) -> Result<bool, ProviderError> {
            self.0.close_trade(closure).await
        }
        async fn closed_trades_on(&self, asset: &str, day: NaiveDate) -> Result<u32, ProviderError> {
            self.0.closed_trades_on(asset, day).await
        }
        async fn pattern_stats(&self, pattern: &str, asset: &str) -> Result<Option<PatternStats>, ProviderError> {
            self.0.pattern_stats(pattern, asset).await
        }
        async fn control_get(&self, key: &str) -> Result<Option<String>, ProviderError> {
            self.0.control_get(key).await
        }
        async fn control_set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
            self.0.control_set(key, value).await
        }
        async fn control_delete(&self, key: &str) -> Result<(), ProviderError> {
            self.0.control_delete(key).await
        }
        async fn control_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
            self.0.control_keys_with_prefix(prefix).await
        }
        async fn save_log(&self, entry: &LogEntry) -> Result<(), ProviderError> {
            self.0.save_log(entry).await
        }
    }

    fn make_gate(store: Arc<dyn Store>) -> SignalGate {
        SignalGate::new(
            store,
            SessionClock::new(chrono_tz::Europe::Paris),
            GateConfig::default(),
            RetryPolicy::default(),
        )
    }

    fn make_trade(level: &str) -> Decision {
        let mut d = Decision::no_trade("XAUUSD", "sweep", "claude");
        d.direction   = Direction::Long;
        d.scenario    = Scenario::Reversal;
        d.confidence  = 80;
        d.entry_price = Some(2000.0);
        d.sl_price    = Some(1995.0);
        d.tp_price    = Some(2010.0);
        d.rr_ratio    = Some(2.0);
        d.sweep_level = Some(level.to_string());
        d.trade_valid = true;
        d
    }

    /// 15:00 Paris on 2024-01-15 (winter, UTC+1) + minutes
    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn session_check_blocks_outside_window() {
        let gate = make_gate(Arc::new(MemoryStore::new()));
        assert!(gate.session_check("XAUUSD", at(0)).is_ok());
        let d = gate
            .session_check("XAUUSD", Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap())
            .unwrap_err();
        assert_eq!(d.direction, Direction::None);
        assert_eq!(d.reason, REASON_OUT_OF_SESSION);
        assert!(!d.trade_valid);
    }

    #[tokio::test]
    async fn second_signal_within_window_is_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let gate = make_gate(store.clone());

        let first = gate.admit(make_trade("asia_high"), at(0)).await;
        assert!(first.persisted);
        assert_eq!(first.verdict, Ok(()));

        let second = gate.admit(make_trade("asia_high"), at(10)).await;
        assert_eq!(second.verdict, Err(GateRejection::DuplicateSignal));
        assert!(store.signal(second.signal.id).await.is_some(), "still persisted");

        let other_level = gate.admit(make_trade("london_high"), at(10)).await;
        assert_eq!(other_level.verdict, Ok(()));

        let later = gate.admit(make_trade("asia_high"), at(26)).await;
        assert_eq!(later.verdict, Ok(()), "outside 15 minutes of the last one");
    }

    #[tokio::test]
    async fn quota_blocks_after_two_closed_trades() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_closed_trades("XAUUSD", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(), 2)
            .await;
        let gate = make_gate(store);
        let out = gate.admit(make_trade("asia_high"), at(0)).await;
        assert_eq!(out.verdict, Err(GateRejection::QuotaExceeded { closed: 2, max: 2 }));
    }

    #[tokio::test]
    async fn low_rr_is_not_tradeable() {
        let gate = make_gate(Arc::new(MemoryStore::new()));
        let mut d = make_trade("asia_high");
        d.tp_price = Some(2005.0); // rr = 1.0
        let out = gate.admit(d, at(0)).await;
        assert!(matches!(out.verdict, Err(GateRejection::NotTradeable(_))));
    }

    #[tokio::test]
    async fn non_tradeable_decision_is_persisted_not_executed() {
        let store = Arc::new(MemoryStore::new());
        let gate = make_gate(store.clone());
        let out = gate.admit(Decision::no_trade("XAUUSD", "unclear", "claude"), at(0)).await;
        assert!(matches!(out.verdict, Err(GateRejection::NotTradeable(_))));
        let saved = store.signal(out.signal.id).await.unwrap();
        assert!(!saved.executed);
    }

    #[tokio::test]
    async fn not_tradeable_signal_still_blocks_the_same_setup() {
        let store = Arc::new(MemoryStore::new());
        let gate = make_gate(store.clone());

        let mut weak = make_trade("asia_high");
        weak.trade_valid = false;
        weak.clear_levels();
        let first = gate.admit(weak, at(0)).await;
        assert!(matches!(first.verdict, Err(GateRejection::NotTradeable(_))));

        let second = gate.admit(make_trade("asia_high"), at(5)).await;
        assert_eq!(second.verdict, Err(GateRejection::DuplicateSignal));
    }

    #[tokio::test]
    async fn target_behind_entry_is_invalid_format() {
        let gate = make_gate(Arc::new(MemoryStore::new()));
        let mut d = make_trade("asia_high");
        d.tp_price = Some(1990.0); // long with tp below entry, |rr| = 2
        let out = gate.admit(d, at(0)).await;
        assert_eq!(out.verdict, Err(GateRejection::InvalidDecisionFormat));

        let mut short = make_trade("asia_low");
        short.direction = Direction::Short; // sl below entry on a short
        let out = gate.admit(short, at(0)).await;
        assert_eq!(out.verdict, Err(GateRejection::InvalidDecisionFormat));
    }

    #[tokio::test(start_paused = true)]
    async fn unpersisted_signal_is_never_executed() {
        let gate = make_gate(Arc::new(SignalWritesFail(MemoryStore::new())));
        let out = gate.admit(make_trade("asia_high"), at(0)).await;
        assert!(!out.persisted);
        assert!(matches!(out.verdict, Err(GateRejection::StoreUnavailable(_))));
    }
}
