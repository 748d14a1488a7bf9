//! Domain models shared across the whole engine.

pub mod candle;
pub mod confluence;
pub mod decision;
pub mod levels;
pub mod log;
pub mod trade;

pub use candle::Candle;
pub use confluence::{Bias, Confluence, ConfluenceKind, Zone};
pub use decision::{Decision, Direction, Scenario, Sentiment, Signal};
pub use levels::{KeyLevel, KeyLevelSet, LevelName, SweepEvent, SweepReaction};
pub use log::LogEntry;
pub use trade::{
    ClosedPosition, CloseReason, OrderRequest, PatternStats, Position, SymbolSpec, Trade,
    TradeClosure, TradeStatus,
};
