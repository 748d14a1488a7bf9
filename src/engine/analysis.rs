//! # engine::analysis — Analysis Loop
//!
//! ทุก tick (default 10s) ต่อ asset:
//!
//! ```text
//! get_candles → KeyLevelTracker.observe (แท่งใหม่เท่านั้น)
//!   └─ ไม่มีแท่งใหม่ตั้งแต่ last_analyzed → ข้าม
//!   └─ นอก Session → synthetic none (ไม่เรียก Router)
//!   └─ Confluence + Sweep + Indicators + Sentiment + Stats → DecisionRequest
//!        → DecisionRouter → SignalGate → PositionSizer → place_order → Trade(Submitted)
//! ```
//!
//! [`EngineState`] (paused flag, last analysed candle per asset) is explicit
//! and every mutation is persisted with one control-key upsert, so a restart
//! never re-analyses a candle it already handled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::confluence::{self, ConfluenceConfig};
use crate::engine::gate::{GateConfig, SignalGate};
use crate::engine::indicators::IndicatorSnapshot;
use crate::engine::key_levels::KeyLevelTracker;
use crate::engine::request::{DecisionRequest, DecisionRequestBuilder};
use crate::engine::resilience::{call_with_retry, RetryPolicy};
use crate::engine::router::{DecisionRouter, RoutePath};
use crate::engine::session::{Clock, SessionClock};
use crate::engine::sizer::PositionSizer;
use crate::engine::sweep::{self, SweepConfig};
use crate::error::{BuildError, GateRejection, SizingError};
use crate::events::{EngineEvent, EventBus};
use crate::models::{Candle, Decision, OrderRequest, Scenario, Sentiment, Signal, Trade};
use crate::providers::{ExecutionProvider, SentimentProvider};
use crate::store::{last_analyzed_key, Store, KEY_BOT_PAUSED};

/// Minimum rolling buffer per asset (≈ 25h of M5).
const MIN_BUFFER: usize = 300;

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub assets:          Vec<String>,
    pub timezone:        Tz,
    pub history_candles: usize,
    pub recent_candles:  usize,
    pub confluence:      ConfluenceConfig,
    pub sweep:           SweepConfig,
    pub gate:            GateConfig,
    pub risk_fraction:   f64,
    /// Market data, sentiment, store
    pub provider_policy: RetryPolicy,
    /// `place_order`: timeouts are never retried (the order may have landed)
    pub order_policy:    RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let provider_policy = RetryPolicy::default();
        Self {
            assets:          vec!["XAUUSD".into(), "US100".into()],
            timezone:        chrono_tz::Europe::Paris,
            history_candles: 600,
            recent_candles:  60,
            confluence:      ConfluenceConfig::default(),
            sweep:           SweepConfig::default(),
            gate:            GateConfig::default(),
            risk_fraction:   0.01,
            order_policy:    RetryPolicy { retry_timeouts: false, ..provider_policy.clone() },
            provider_policy,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(cfg: &Config) -> Self {
        let provider_policy = cfg.provider_policy();
        Self {
            assets:          cfg.assets.clone(),
            timezone:        cfg.timezone,
            history_candles: cfg.history_candles,
            recent_candles:  cfg.recent_candles,
            confluence:      cfg.confluence.clone(),
            sweep:           cfg.sweep.clone(),
            gate:            cfg.gate.clone(),
            risk_fraction:   cfg.risk_fraction,
            order_policy:    RetryPolicy { retry_timeouts: false, ..provider_policy.clone() },
            provider_policy,
        }
    }
}

/// External collaborators shared by both loops.
#[derive(Clone)]
pub struct EngineDeps {
    pub exec:   Arc<dyn ExecutionProvider>,
    pub store:  Arc<dyn Store>,
    pub news:   Arc<dyn SentimentProvider>,
    pub social: Arc<dyn SentimentProvider>,
    pub clock:  Arc<dyn Clock>,
    pub events: EventBus,
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineState {
    pub paused:        bool,
    pub last_analyzed: HashMap<String, DateTime<Utc>>,
}

struct AssetSession {
    tracker: KeyLevelTracker,
    candles: VecDeque<Candle>,
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Paused,
    /// Market data unavailable (or empty) this tick
    NoData,
    NoNewCandle,
    OutsideSession { decision: Decision },
    BuildFailed(BuildError),
    Rejected { signal_id: Uuid, path: RoutePath, rejection: GateRejection },
    SizingFailed { signal_id: Uuid, error: SizingError },
    OrderFailed { signal_id: Uuid, error: String },
    Executed { signal_id: Uuid, trade_id: Uuid, ticket: u64, lots: f64 },
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct AnalysisEngine {
    settings: EngineSettings,
    clock:    SessionClock,
    deps:     EngineDeps,
    router:   DecisionRouter,
    gate:     SignalGate,
    sizer:    PositionSizer,
    sessions: HashMap<String, AssetSession>,
    state:    EngineState,
}

impl AnalysisEngine {
    pub fn new(settings: EngineSettings, deps: EngineDeps, router: DecisionRouter) -> Self {
        let clock = SessionClock::new(settings.timezone);
        let gate = SignalGate::new(
            deps.store.clone(),
            clock,
            settings.gate.clone(),
            settings.provider_policy.clone(),
        );
        let sizer = PositionSizer::new(settings.risk_fraction);
        Self {
            settings,
            clock,
            deps,
            router,
            gate,
            sizer,
            sessions: HashMap::new(),
            state: EngineState::default(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Restore persisted state (call once before the first tick).
    pub async fn load_state(&mut self) {
        let policy = self.settings.provider_policy.clone();
        for asset in self.settings.assets.clone() {
            let key = last_analyzed_key(&asset);
            match call_with_retry("control_get", &policy, || self.deps.store.control_get(&key)).await {
                Ok(Some(raw)) => match DateTime::parse_from_rfc3339(&raw) {
                    Ok(ts) => {
                        self.state.last_analyzed.insert(asset.clone(), ts.with_timezone(&Utc));
                    }
                    Err(err) => warn!(asset = %asset, raw = %raw, error = %err, "bad last_analyzed value"),
                },
                Ok(None) => {}
                Err(err) => warn!(asset = %asset, error = %err, "cannot restore last_analyzed"),
            }
        }
        self.state.paused = self.read_paused().await;
        info!(state = ?self.state, "engine state restored");
    }

    /// One analysis tick over every asset.
    pub async fn run_tick(&mut self) -> Vec<(String, TickOutcome)> {
        let paused = self.read_paused().await;
        if paused != self.state.paused {
            info!(paused, "⏯️ bot pause state changed");
            self.state.paused = paused;
        }

        let mut out = Vec::with_capacity(self.settings.assets.len());
        for asset in self.settings.assets.clone() {
            let outcome = if paused {
                TickOutcome::Paused
            } else {
                self.analyze_asset(&asset).await
            };
            debug!(asset = %asset, ?outcome, "tick outcome");
            out.push((asset, outcome));
        }
        out
    }

    async fn read_paused(&self) -> bool {
        match call_with_retry("control_get", &self.settings.provider_policy, || {
            self.deps.store.control_get(KEY_BOT_PAUSED)
        })
        .await
        {
            Ok(v) => v.map(|s| s.trim().eq_ignore_ascii_case("true")).unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "cannot read bot_paused, keeping last known state");
                self.state.paused
            }
        }
    }

    // ─── Per-asset pipeline ───────────────────────────────────────────────────

    pub async fn analyze_asset(&mut self, asset: &str) -> TickOutcome {
        // ── 1. Market data ────────────────────────────────────────────────────
        let Some(latest) = self.ingest(asset).await else {
            self.skip(asset, "no_data");
            return TickOutcome::NoData;
        };

        // ── 2. New candle? ────────────────────────────────────────────────────
        if self
            .state
            .last_analyzed
            .get(asset)
            .is_some_and(|seen| *seen >= latest.time)
        {
            return TickOutcome::NoNewCandle;
        }
        self.mark_analyzed(asset, latest.time).await;

        // ── 3. Session gate ───────────────────────────────────────────────────
        if let Err(decision) = self.gate.session_check(asset, latest.time) {
            debug!(asset, candle = %latest.time, "outside trading window");
            self.skip(asset, &decision.reason);
            return TickOutcome::OutsideSession { decision };
        }

        // ── 4. Request ────────────────────────────────────────────────────────
        let request = match self.build_request(asset).await {
            Ok(r) => r,
            Err(err) => {
                warn!(asset, error = %err, "decision request not built");
                self.skip(asset, &err.to_string());
                return TickOutcome::BuildFailed(err);
            }
        };

        // ── 5. Route + gate ───────────────────────────────────────────────────
        let routed = self.router.route(&request).await;
        let outcome = self.gate.admit(routed.decision, latest.time).await;

        self.deps.events.publish(&EngineEvent::SignalProduced {
            signal_id: outcome.signal.id,
            path:      format!("{:?}", routed.path).to_lowercase(),
            decision:  Box::new(outcome.signal.decision.clone()),
        });

        if let Err(rejection) = outcome.verdict {
            self.deps.events.publish(&EngineEvent::SignalRejected {
                signal_id: outcome.signal.id,
                asset:     asset.to_string(),
                rejection: rejection.to_string(),
            });
            return TickOutcome::Rejected { signal_id: outcome.signal.id, path: routed.path, rejection };
        }

        // ── 6. Size + execute ─────────────────────────────────────────────────
        self.execute(&outcome.signal).await
    }

    /// Fetch, keep closed candles only, feed new ones to the tracker.
    /// Returns the newest candle held for the asset.
    async fn ingest(&mut self, asset: &str) -> Option<Candle> {
        let warm = self
            .sessions
            .get(asset)
            .is_some_and(|s| s.tracker.last_seen().is_some());
        let count = if warm { self.settings.recent_candles } else { self.settings.history_candles };

        let fetched = call_with_retry("get_candles", &self.settings.provider_policy, || {
            self.deps.exec.get_candles(asset, count)
        })
        .await;
        let mut candles = match fetched {
            Ok(c) => c,
            Err(err) => {
                warn!(asset, error = %err, "📉 market data unavailable, skipping asset");
                return None;
            }
        };

        let now = self.deps.clock.now();
        candles.retain(|c| c.time <= now);
        candles.sort_by_key(|c| c.time);

        let cap = self.settings.history_candles.max(MIN_BUFFER);
        let clock = self.clock;
        let session = self.sessions.entry(asset.to_string()).or_insert_with(|| AssetSession {
            tracker: KeyLevelTracker::new(clock),
            candles: VecDeque::with_capacity(cap + 1),
        });

        for c in candles {
            if session.tracker.observe(&c) {
                session.candles.push_back(c);
                if session.candles.len() > cap {
                    session.candles.pop_front();
                }
            }
        }
        session.candles.back().copied()
    }

    async fn build_request(&self, asset: &str) -> Result<DecisionRequest, BuildError> {
        let (levels, buffer): (_, Vec<Candle>) = match self.sessions.get(asset) {
            Some(s) => (s.tracker.levels(), s.candles.iter().copied().collect()),
            None => (None, Vec::new()),
        };
        let Some(latest) = buffer.last().copied() else {
            return Err(BuildError::MissingCandles(asset.to_string()));
        };

        let confluences = confluence::detect(&buffer, &self.settings.confluence);
        let sweeps = match &levels {
            Some(lv) => {
                let today: Vec<Candle> = buffer
                    .iter()
                    .filter(|c| self.clock.civil_date(c.open_time()) == lv.day)
                    .copied()
                    .collect();
                sweep::detect(lv, &today, &self.clock, &self.settings.sweep)
            }
            None => Vec::new(),
        };
        let indicators = IndicatorSnapshot::compute(&buffer);

        let news = self.sentiment(&self.deps.news, asset).await;
        let social = self.sentiment(&self.deps.social, asset).await;

        let mut stats = Vec::new();
        for pattern in [Scenario::Reversal, Scenario::Continuation] {
            match call_with_retry("pattern_stats", &self.settings.provider_policy, || {
                self.deps.store.pattern_stats(pattern.as_str(), asset)
            })
            .await
            {
                Ok(Some(s)) => stats.push(s),
                Ok(None) => {}
                Err(err) => warn!(asset, pattern = pattern.as_str(), error = %err, "pattern stats unavailable"),
            }
        }

        let day = self.clock.civil_date(latest.time);
        let closed_today = call_with_retry("closed_trades_on", &self.settings.provider_policy, || {
            self.deps.store.closed_trades_on(asset, day)
        })
        .await
        .unwrap_or_else(|err| {
            warn!(asset, error = %err, "daily quota unavailable for request context");
            0
        });

        let tail = buffer.len().saturating_sub(self.settings.confluence.window);
        DecisionRequestBuilder::new(asset)
            .candles(buffer[tail..].to_vec())
            .key_levels(levels)
            .confluences(confluences)
            .sweeps(sweeps)
            .indicators(indicators)
            .sentiment(news, social)
            .pattern_stats(stats)
            .quota(closed_today, self.settings.gate.max_closed_trades_per_day)
            .civil_time(self.clock.civil(latest.time).format("%Y-%m-%d %H:%M %Z").to_string())
            .build()
    }

    async fn sentiment(&self, provider: &Arc<dyn SentimentProvider>, asset: &str) -> Option<Sentiment> {
        match call_with_retry(provider.name(), &self.settings.provider_policy, || provider.sentiment(asset)).await {
            Ok(s) => Some(s),
            Err(err) => {
                warn!(asset, provider = provider.name(), error = %err, "sentiment unavailable, neutral");
                None
            }
        }
    }

    async fn execute(&self, signal: &Signal) -> TickOutcome {
        let d = &signal.decision;
        let asset = d.asset.as_str();
        let policy = &self.settings.provider_policy;

        let (Some(entry), Some(sl), Some(tp)) = (d.entry_price, d.sl_price, d.tp_price) else {
            return self.order_failed(signal, "decision has no price levels".into());
        };

        let balance = match call_with_retry("get_account_balance", policy, || {
            self.deps.exec.get_account_balance()
        })
        .await
        {
            Ok(b) => b,
            Err(err) => return self.order_failed(signal, err.to_string()),
        };

        let spec = match call_with_retry("get_symbol_pip_value", policy, || {
            self.deps.exec.get_symbol_pip_value(asset)
        })
        .await
        {
            Ok(s) => s,
            Err(err) => return self.order_failed(signal, err.to_string()),
        };

        let lot = match self.sizer.size(balance, d.direction, entry, sl, &spec) {
            Ok(lot) => lot,
            Err(err) => {
                warn!(asset, error = %err, "📏 sizing refused");
                self.deps.events.publish(&EngineEvent::OrderFailed {
                    signal_id: signal.id,
                    asset:     asset.to_string(),
                    error:     err.to_string(),
                });
                return TickOutcome::SizingFailed { signal_id: signal.id, error: err };
            }
        };

        let order = OrderRequest {
            asset:     asset.to_string(),
            direction: d.direction,
            lot:       lot.lots,
            entry,
            sl,
            tp,
            comment:   format!("sweepline {}", d.scenario.as_str()),
        };

        info!(
            asset,
            direction = d.direction.as_str(),
            lots = lot.lots,
            entry,
            sl,
            tp,
            risk = lot.risk_amount,
            "🚀 placing order"
        );

        let ticket = match call_with_retry("place_order", &self.settings.order_policy, || {
            self.deps.exec.place_order(&order)
        })
        .await
        {
            Ok(t) => t,
            Err(err) => return self.order_failed(signal, err.to_string()),
        };

        let trade = Trade::submitted(signal.id, d, &order, ticket, self.deps.clock.now());
        if let Err(err) = call_with_retry("save_trade", policy, || self.deps.store.save_trade(&trade)).await {
            // the position exists at the broker but the monitor loop cannot see it
            error!(asset, ticket, error = %err, "💾 trade placed but NOT persisted");
        }
        if let Err(err) = call_with_retry("mark_signal_executed", policy, || {
            self.deps.store.mark_signal_executed(signal.id)
        })
        .await
        {
            error!(asset, ticket, error = %err, "💾 signal not marked executed");
        }

        info!(asset, ticket, lots = lot.lots, "✅ order placed");
        self.deps.events.publish(&EngineEvent::OrderPlaced {
            trade_id:  trade.id,
            asset:     asset.to_string(),
            direction: d.direction,
            ticket,
            lots:      lot.lots,
            entry,
            sl,
            tp,
        });

        TickOutcome::Executed { signal_id: signal.id, trade_id: trade.id, ticket, lots: lot.lots }
    }

    fn order_failed(&self, signal: &Signal, error: String) -> TickOutcome {
        error!(asset = %signal.decision.asset, error = %error, "❌ order not placed");
        self.deps.events.publish(&EngineEvent::OrderFailed {
            signal_id: signal.id,
            asset:     signal.decision.asset.clone(),
            error:     error.clone(),
        });
        TickOutcome::OrderFailed { signal_id: signal.id, error }
    }

    async fn mark_analyzed(&mut self, asset: &str, ts: DateTime<Utc>) {
        self.state.last_analyzed.insert(asset.to_string(), ts);
        let key = last_analyzed_key(asset);
        let value = ts.to_rfc3339();
        if let Err(err) = call_with_retry("control_set", &self.settings.provider_policy, || {
            self.deps.store.control_set(&key, &value)
        })
        .await
        {
            error!(asset, error = %err, "💾 last_analyzed not persisted");
        }
    }

    fn skip(&self, asset: &str, reason: &str) {
        self.deps.events.publish(&EngineEvent::TickSkipped {
            asset:  asset.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Analysis loop. Never overlaps itself; stops when `shutdown` flips.
pub async fn run_analysis_loop(
    mut engine:   AnalysisEngine,
    period:       Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    engine.load_state().await;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), assets = ?engine.settings.assets, "🔁 analysis loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.run_tick().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("analysis loop stopped");
}
