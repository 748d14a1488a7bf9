//! # store::memory — In-memory Store
//!
//! `tokio::sync::RwLock` รอบ state ทั้งก้อน — ใช้ใน test และตอนไม่มี DATABASE_URL
//! (ข้อมูลหายเมื่อ restart)

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::{Direction, LogEntry, PatternStats, Signal, Trade, TradeClosure, TradeStatus};
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    signals: Vec<Signal>,
    trades:  HashMap<Uuid, Trade>,
    quota:   HashMap<(String, NaiveDate), u32>,
    stats:   HashMap<(String, String), PatternStats>,
    control: BTreeMap<String, String>,
    logs:    VecDeque<LogEntry>,
}

/// Log lines kept in memory (oldest dropped first).
const MAX_LOGS: usize = 1000;

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test / bootstrap helper: set a quota row directly.
    pub async fn set_closed_trades(&self, asset: &str, day: NaiveDate, count: u32) {
        self.inner.write().await.quota.insert((asset.to_string(), day), count);
    }

    pub async fn trade(&self, id: Uuid) -> Option<Trade> {
        self.inner.read().await.trades.get(&id).cloned()
    }

    pub async fn signal(&self, id: Uuid) -> Option<Signal> {
        self.inner.read().await.signals.iter().find(|s| s.id == id).cloned()
    }

    /// Oldest first.
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.inner.read().await.logs.iter().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_signal(&self, signal: &Signal) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        match inner.signals.iter_mut().find(|s| s.id == signal.id) {
            Some(existing) => *existing = signal.clone(),
            None => inner.signals.push(signal.clone()),
        }
        Ok(())
    }

    async fn mark_signal_executed(&self, id: Uuid) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.signals.iter_mut().find(|s| s.id == id) {
            s.executed = true;
        }
        Ok(())
    }

    async fn find_recent_signal(
        &self,
        asset:       &str,
        direction:   Direction,
        sweep_level: Option<&str>,
        since:       DateTime<Utc>,
        exclude:     Uuid,
    ) -> Result<Option<Signal>, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner
            .signals
            .iter()
            .filter(|s| {
                s.id != exclude
                    && s.decision.asset == asset
                    && s.decision.direction == direction
                    && s.decision.sweep_level.as_deref() == sweep_level
                    && s.timestamp >= since
            })
            .max_by_key(|s| s.timestamp)
            .cloned())
    }

    async fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>, ProviderError> {
        let inner = self.inner.read().await;
        let mut all = inner.signals.clone();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        Ok(all)
    }

    async fn save_trade(&self, trade: &Trade) -> Result<(), ProviderError> {
        self.inner.write().await.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn open_trades(&self) -> Result<Vec<Trade>, ProviderError> {
        let inner = self.inner.read().await;
        let mut open: Vec<Trade> = inner
            .trades
            .values()
            .filter(|t| t.status != TradeStatus::Closed)
            .cloned()
            .collect();
        open.sort_by_key(|t| t.entry_time);
        Ok(open)
    }

    async fn mark_trade_open(&self, id: Uuid) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        if let Some(t) = inner.trades.get_mut(&id) {
            if t.status == TradeStatus::Submitted {
                t.status = TradeStatus::Open;
            }
        }
        Ok(())
    }

    async fn close_trade(&self, closure: &TradeClosure) -> Result<bool, ProviderError> {
        // single write guard = the transaction
        let mut inner = self.inner.write().await;

        match inner.trades.get_mut(&closure.trade_id) {
            Some(t) if t.status != TradeStatus::Closed => {
                t.status        = TradeStatus::Closed;
                t.exit_price    = Some(closure.exit_price);
                t.exit_time     = Some(closure.exit_time);
                t.pnl           = Some(closure.pnl);
                t.closed_reason = Some(closure.reason);
            }
            _ => return Ok(false),
        }

        *inner
            .quota
            .entry((closure.asset.clone(), closure.day))
            .or_insert(0) += 1;

        inner
            .stats
            .entry((closure.pattern.clone(), closure.asset.clone()))
            .or_insert_with(|| PatternStats::new(&closure.pattern, &closure.asset))
            .record(closure.pnl, closure.realized_rr);

        Ok(true)
    }

    async fn closed_trades_on(&self, asset: &str, day: NaiveDate) -> Result<u32, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner.quota.get(&(asset.to_string(), day)).copied().unwrap_or(0))
    }

    async fn pattern_stats(
        &self,
        pattern: &str,
        asset:   &str,
    ) -> Result<Option<PatternStats>, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner.stats.get(&(pattern.to_string(), asset.to_string())).cloned())
    }

    async fn control_get(&self, key: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.inner.read().await.control.get(key).cloned())
    }

    async fn control_set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        self.inner
            .write()
            .await
            .control
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn control_delete(&self, key: &str) -> Result<(), ProviderError> {
        self.inner.write().await.control.remove(key);
        Ok(())
    }

    async fn control_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner
            .control
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn save_log(&self, entry: &LogEntry) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        if inner.logs.len() >= MAX_LOGS {
            inner.logs.pop_front();
        }
        inner.logs.push_back(entry.clone());
        Ok(())
    }
}
