//! Fakes and a canned trading day shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use sweepline::engine::analysis::{AnalysisEngine, EngineDeps, EngineSettings};
use sweepline::engine::request::DecisionRequest;
use sweepline::engine::resilience::RetryPolicy;
use sweepline::engine::router::DecisionRouter;
use sweepline::engine::session::{Clock, FixedClock};
use sweepline::error::ProviderError;
use sweepline::events::EventBus;
use sweepline::models::{
    Candle, ClosedPosition, Decision, Direction, OrderRequest, Position, Scenario, Sentiment,
    SymbolSpec,
};
use sweepline::providers::{DecisionProvider, ExecutionProvider, SentimentProvider};
use sweepline::store::MemoryStore;

pub const ASSET: &str = "XAUUSD";
pub const ASIA_HIGH: f64 = 2010.0;

// ─── Canned Day ───────────────────────────────────────────────────────────────
//
// 2024-01-15, Paris = UTC+1.
//   Asia    (23:00–08:00 UTC): 1995 – 2010
//   London  (08:00–13:30 UTC): 1999 – 2004
//   Trading (13:30 UTC → )   : 4 quiet candles, then a wick through asia_high
//                              that closes back below it.

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn open_at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
}

fn candle(open_time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        time: open_time + chrono::Duration::minutes(5),
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

/// Close time of the sweep candle (opens 13:50 UTC / 14:50 Paris).
pub fn sweep_close() -> DateTime<Utc> {
    open_at(13, 55)
}

/// Close time of the London candle opening 10:00 UTC.
pub fn london_close() -> DateTime<Utc> {
    open_at(10, 5)
}

/// Every candle of the canned day, plus `after` quiet candles after the sweep.
pub fn trading_day(after: usize) -> Vec<Candle> {
    let mut out = Vec::new();
    let start = Utc.with_ymd_and_hms(2024, 1, 14, 23, 0, 0).unwrap();
    let step = chrono::Duration::minutes(5);

    let mut t = start;
    let mut i = 0u32;
    // Asia
    while t < open_at(8, 0) {
        let (o, c) = if i % 2 == 0 { (2000.0, 2001.0) } else { (2001.0, 2000.0) };
        let high = if t == open_at(3, 0) { ASIA_HIGH } else { 2002.0 };
        let low = if t == open_at(5, 0) { 1995.0 } else { 1998.0 };
        out.push(candle(t, o, high, low, c));
        t += step;
        i += 1;
    }
    // London
    while t < open_at(13, 30) {
        let (o, c) = if i % 2 == 0 { (2001.0, 2002.0) } else { (2002.0, 2001.0) };
        out.push(candle(t, o, 2004.0, 1999.0, c));
        t += step;
        i += 1;
    }
    // Trading, quiet
    while t < open_at(13, 50) {
        let (o, c) = if i % 2 == 0 { (2001.0, 2002.0) } else { (2002.0, 2001.0) };
        out.push(candle(t, o, 2003.5, 1999.5, c));
        t += step;
        i += 1;
    }
    // Sweep of asia_high
    out.push(candle(t, 2005.0, 2012.0, 2005.0, 2008.0));
    t += step;

    for _ in 0..after {
        out.push(candle(t, 2007.0, 2008.5, 2006.0, 2006.5));
        t += step;
    }
    out
}

pub fn gold_spec() -> SymbolSpec {
    SymbolSpec { pip_size: 0.01, pip_value: 1.0, volume_min: 0.01, volume_max: 50.0, volume_step: 0.01 }
}

/// Short the asia_high sweep: entry 2008, sl 2013, tp 1998 (rr 2).
pub fn short_reversal(confidence: u8) -> Decision {
    let mut d = Decision::no_trade(ASSET, "asia_high swept, closed back inside, bullish FVG below", "");
    d.direction        = Direction::Short;
    d.scenario         = Scenario::Reversal;
    d.confidence       = confidence;
    d.entry_price      = Some(2008.0);
    d.sl_price         = Some(2013.0);
    d.tp_price         = Some(1998.0);
    d.rr_ratio         = Some(2.0);
    d.confluences_used = vec!["FVG".into()];
    d.sweep_level      = Some("asia_high".into());
    d.trade_valid      = true;
    d
}

// ─── Fake Execution ───────────────────────────────────────────────────────────

pub struct FakeExec {
    clock:               Arc<FixedClock>,
    pub candles:         Mutex<Vec<Candle>>,
    pub balance:         Mutex<f64>,
    pub spec:            SymbolSpec,
    pub orders:          Mutex<Vec<OrderRequest>>,
    pub positions:       Mutex<Vec<Position>>,
    pub history:         Mutex<HashMap<u64, ClosedPosition>>,
    pub close_requests:  Mutex<Vec<u64>>,
    /// exit price used when a close is requested
    pub manual_exit:     Mutex<f64>,
    pub fail_candles:    AtomicBool,
    pub fail_positions:  AtomicBool,
    pub reject_orders:   AtomicBool,
    pub candle_calls:    AtomicU32,
    next_ticket:         AtomicU64,
}

impl FakeExec {
    pub fn new(clock: Arc<FixedClock>, candles: Vec<Candle>) -> Self {
        Self {
            clock,
            candles:        Mutex::new(candles),
            balance:        Mutex::new(10_000.0),
            spec:           gold_spec(),
            orders:         Mutex::new(Vec::new()),
            positions:      Mutex::new(Vec::new()),
            history:        Mutex::new(HashMap::new()),
            close_requests: Mutex::new(Vec::new()),
            manual_exit:    Mutex::new(2003.0),
            fail_candles:   AtomicBool::new(false),
            fail_positions: AtomicBool::new(false),
            reject_orders:  AtomicBool::new(false),
            candle_calls:   AtomicU32::new(0),
            next_ticket:    AtomicU64::new(5001),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Broker-side close (tp / sl hit) of an open position.
    pub fn settle(&self, ticket: u64, exit_price: f64, exit_time: DateTime<Utc>, profit: f64) {
        self.positions.lock().unwrap().retain(|p| p.ticket != ticket);
        self.history
            .lock()
            .unwrap()
            .insert(ticket, ClosedPosition { ticket, exit_price, exit_time, profit });
    }

    /// Register a live position directly (lifecycle tests without the engine).
    pub fn open_position(&self, ticket: u64) {
        self.positions.lock().unwrap().push(Position {
            ticket,
            symbol:     ASSET.into(),
            volume:     0.2,
            price_open: 2008.0,
            sl:         2013.0,
            tp:         1998.0,
            profit:     0.0,
        });
    }
}

#[async_trait]
impl ExecutionProvider for FakeExec {
    async fn get_candles(&self, _asset: &str, count: usize) -> Result<Vec<Candle>, ProviderError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_candles.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("bridge down".into()));
        }
        let now = self.clock.now();
        let closed: Vec<Candle> = self
            .candles
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.time <= now)
            .copied()
            .collect();
        let skip = closed.len().saturating_sub(count);
        Ok(closed[skip..].to_vec())
    }

    async fn get_account_balance(&self) -> Result<f64, ProviderError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_symbol_pip_value(&self, _asset: &str) -> Result<SymbolSpec, ProviderError> {
        Ok(self.spec)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<u64, ProviderError> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("MT5 rejected: retcode=10019 comment=No money".into()));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.clone());
        self.positions.lock().unwrap().push(Position {
            ticket,
            symbol:     order.asset.clone(),
            volume:     order.lot,
            price_open: order.entry,
            sl:         order.sl,
            tp:         order.tp,
            profit:     0.0,
        });
        Ok(ticket)
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>, ProviderError> {
        if self.fail_positions.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("bridge down".into()));
        }
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn close_position(&self, ticket: u64) -> Result<(), ProviderError> {
        self.close_requests.lock().unwrap().push(ticket);
        let exit = *self.manual_exit.lock().unwrap();
        let now = self.clock.now();
        self.settle(ticket, exit, now, 10.0);
        Ok(())
    }

    async fn get_closed_position(&self, ticket: u64) -> Result<Option<ClosedPosition>, ProviderError> {
        Ok(self.history.lock().unwrap().get(&ticket).cloned())
    }
}

// ─── Fake Decision Provider ───────────────────────────────────────────────────

#[derive(Clone)]
pub enum Behaviour {
    Answer(Decision),
    Hang,
    Fail(ProviderError),
}

pub struct FakeDecider {
    name:          &'static str,
    behaviour:     Mutex<Behaviour>,
    pub calls:     AtomicU32,
    pub requests:  Mutex<Vec<DecisionRequest>>,
}

impl FakeDecider {
    pub fn new(name: &'static str, behaviour: Behaviour) -> Self {
        Self {
            name,
            behaviour: Mutex::new(behaviour),
            calls:     AtomicU32::new(0),
            requests:  Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<DecisionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DecisionProvider for FakeDecider {
    fn name(&self) -> &str {
        self.name
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            Behaviour::Answer(d) => Ok(d),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Fail(err) => Err(err),
        }
    }
}

// ─── Fake Sentiment ───────────────────────────────────────────────────────────

pub struct FakeSentiment {
    pub value: Sentiment,
    pub fail:  bool,
}

#[async_trait]
impl SentimentProvider for FakeSentiment {
    fn name(&self) -> &str {
        "fake-sentiment"
    }

    async fn sentiment(&self, _asset: &str) -> Result<Sentiment, ProviderError> {
        if self.fail {
            Err(ProviderError::Transient("sentiment source down".into()))
        } else {
            Ok(self.value)
        }
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts:    3,
        backoff:         vec![Duration::ZERO],
        attempt_timeout: Duration::from_secs(5),
        retry_timeouts:  true,
    }
}

pub fn decision_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts:    3,
        backoff:         vec![Duration::ZERO],
        attempt_timeout: Duration::from_secs(10),
        retry_timeouts:  false,
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        assets:          vec![ASSET.to_string()],
        provider_policy: fast_policy(),
        order_policy:    RetryPolicy { retry_timeouts: false, ..fast_policy() },
        ..EngineSettings::default()
    }
}

pub struct Harness {
    pub clock:    Arc<FixedClock>,
    pub exec:     Arc<FakeExec>,
    pub store:    Arc<MemoryStore>,
    pub primary:  Arc<FakeDecider>,
    pub fallback: Arc<FakeDecider>,
    pub events:   EventBus,
}

impl Harness {
    /// Clock at the sweep candle's close; primary answers the short reversal.
    pub fn new(after: usize) -> Self {
        let clock = Arc::new(FixedClock::new(sweep_close() + chrono::Duration::seconds(1)));
        let exec = Arc::new(FakeExec::new(clock.clone(), trading_day(after)));
        Self {
            clock,
            exec,
            store:    Arc::new(MemoryStore::new()),
            primary:  Arc::new(FakeDecider::new("claude", Behaviour::Answer(short_reversal(80)))),
            fallback: Arc::new(FakeDecider::new("groq", Behaviour::Answer(short_reversal(90)))),
            events:   EventBus::default(),
        }
    }

    pub fn engine(&self) -> AnalysisEngine {
        let deps = EngineDeps {
            exec:   self.exec.clone(),
            store:  self.store.clone(),
            news:   Arc::new(FakeSentiment { value: Sentiment::Bearish, fail: false }),
            social: Arc::new(FakeSentiment { value: Sentiment::Neutral, fail: true }),
            clock:  self.clock.clone(),
            events: self.events.clone(),
        };
        let router = DecisionRouter::new(self.primary.clone(), self.fallback.clone(), decision_policy(), 85);
        AnalysisEngine::new(settings(), deps, router)
    }
}
