//! # Sweepline — Market-Structure Signal Engine
//!
//! ```text
//!  ┌──────────────┐ get_candles  ┌──────────────────────────────────────────┐
//!  │  MT5 Bridge  │ ───────────▶ │ Analysis tick (10s)                      │
//!  └──────────────┘              │  SessionClock → KeyLevelTracker          │
//!        ▲   ▲                   │  ConfluenceDetector → SweepDetector      │
//!        │   │ place_order       │  DecisionRequestBuilder → DecisionRouter │──▶ Claude / Groq
//!        │   └────────────────── │  SignalGate → PositionSizer              │
//!        │                       └──────────────────────────────────────────┘
//!        │ positions / close                         │ Store (signals, quota)
//!        │                       ┌───────────────────▼──────────────────────┐
//!        └────────────────────── │ Monitoring tick (30s)                    │
//!                                │  TradeLifecycleManager                   │
//!                                └──────────────────────────────────────────┘
//! ```
//!
//! The two ticks never share in-process state: everything they exchange goes
//! through the [`store::Store`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logsink;
pub mod models;
pub mod providers;
pub mod routes;
pub mod state;
pub mod store;
