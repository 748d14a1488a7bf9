//! # store — Persistence boundary
//!
//! Signals, trades, daily quota, pattern statistics, the operator control
//! keys and persisted log lines all live behind [`Store`]. The analysis and
//! monitoring loops never share anything else.
//!
//! | Implementation        | When                                    |
//! |-----------------------|-----------------------------------------|
//! | [`MemoryStore`]       | tests, or no `DATABASE_URL`             |
//! | `PgStore` (`postgres` feature) | production                     |

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::{Direction, LogEntry, PatternStats, Signal, Trade, TradeClosure};

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

// ─── Control Keys ─────────────────────────────────────────────────────────────

pub const KEY_BOT_PAUSED: &str = "bot_paused";
pub const CLOSE_TRADE_PREFIX: &str = "close_trade_";

pub fn last_analyzed_key(asset: &str) -> String {
    format!("last_analyzed_{asset}")
}

pub fn close_trade_key(trade_id: Uuid) -> String {
    format!("{CLOSE_TRADE_PREFIX}{trade_id}")
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    // ── Signals ───────────────────────────────────────────────────────────────
    async fn save_signal(&self, signal: &Signal) -> Result<(), ProviderError>;

    async fn mark_signal_executed(&self, id: Uuid) -> Result<(), ProviderError>;

    /// Most recent signal (other than `exclude`, tradeable or not) with the
    /// same dedup key at or after `since`. `sweep_level = None` matches only `None`.
    async fn find_recent_signal(
        &self,
        asset:       &str,
        direction:   Direction,
        sweep_level: Option<&str>,
        since:       DateTime<Utc>,
        exclude:     Uuid,
    ) -> Result<Option<Signal>, ProviderError>;

    /// Newest first.
    async fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>, ProviderError>;

    // ── Trades ────────────────────────────────────────────────────────────────
    async fn save_trade(&self, trade: &Trade) -> Result<(), ProviderError>;

    /// Trades not yet closed (submitted or open).
    async fn open_trades(&self) -> Result<Vec<Trade>, ProviderError>;

    async fn mark_trade_open(&self, id: Uuid) -> Result<(), ProviderError>;

    /// Atomically: close the trade, bump the (asset, day) quota, fold the
    /// result into pattern stats. Returns `false` without touching anything
    /// when the trade is already closed or unknown.
    async fn close_trade(&self, closure: &TradeClosure) -> Result<bool, ProviderError>;

    // ── Quota / Stats ─────────────────────────────────────────────────────────
    async fn closed_trades_on(&self, asset: &str, day: NaiveDate) -> Result<u32, ProviderError>;

    async fn pattern_stats(
        &self,
        pattern: &str,
        asset:   &str,
    ) -> Result<Option<PatternStats>, ProviderError>;

    // ── Bot Control (upsert, last write wins) ─────────────────────────────────
    async fn control_get(&self, key: &str) -> Result<Option<String>, ProviderError>;

    async fn control_set(&self, key: &str, value: &str) -> Result<(), ProviderError>;

    async fn control_delete(&self, key: &str) -> Result<(), ProviderError>;

    async fn control_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ProviderError>;

    // ── Logs ──────────────────────────────────────────────────────────────────
    async fn save_log(&self, entry: &LogEntry) -> Result<(), ProviderError>;
}
