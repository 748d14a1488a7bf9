//! # store::postgres — PostgreSQL Store
//!
//! ใช้ `sqlx` (runtime queries) — schema ใน `migrations/001_init.sql`
//! รันทุกครั้งที่ start (ทุก statement เป็น `IF NOT EXISTS`)
//!
//! `close_trade` ทำใน transaction เดียว: ปิด trade (เฉพาะที่ยังไม่ปิด),
//! quota +1, pattern stats upsert

use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, Executor, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::{
    CloseReason, Decision, Direction, LogEntry, PatternStats, Scenario, Sentiment, Signal, Trade,
    TradeClosure, TradeStatus,
};
use crate::store::Store;

const SIGNAL_COLUMNS: &str = "id, ts, asset, direction, scenario, confidence, entry_price, sl_price, \
     tp_price, rr_ratio, confluences_used, sweep_level, news_sentiment, social_sentiment, \
     trade_valid, reason, provider_used, executed";

const TRADE_COLUMNS: &str = "id, signal_id, asset, direction, pattern, entry_price, entry_time, \
     exit_price, exit_time, sl, tp, lot_size, ticket, pnl, status, closed_reason";

// ─── Error Mapping ────────────────────────────────────────────────────────────

fn db_err(err: sqlx::Error) -> ProviderError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            ProviderError::Transient(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            ProviderError::InvalidFormat(err.to_string())
        }
        other => ProviderError::Rejected(other.to_string()),
    }
}

fn parse_col<T: FromStr<Err = String>>(row: &PgRow, col: &str) -> Result<T, ProviderError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    raw.parse().map_err(ProviderError::InvalidFormat)
}

// ─── Pool Init ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// สร้าง PgPool และ run migration
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        // multi-statement script → simple query protocol
        pool.execute(include_str!("../../migrations/001_init.sql"))
            .await
            .context("Failed to run migration 001_init.sql")?;

        info!("✅ PostgreSQL connected and migrations applied");
        Ok(Self { pool })
    }

    fn signal_from_row(row: &PgRow) -> Result<Signal, ProviderError> {
        let confidence: i16 = row.try_get("confidence").map_err(db_err)?;
        let decision = Decision {
            asset:            row.try_get("asset").map_err(db_err)?,
            direction:        parse_col::<Direction>(row, "direction")?,
            scenario:         parse_col::<Scenario>(row, "scenario")?,
            confidence:       confidence.clamp(0, 100) as u8,
            entry_price:      row.try_get("entry_price").map_err(db_err)?,
            sl_price:         row.try_get("sl_price").map_err(db_err)?,
            tp_price:         row.try_get("tp_price").map_err(db_err)?,
            rr_ratio:         row.try_get("rr_ratio").map_err(db_err)?,
            confluences_used: row.try_get("confluences_used").map_err(db_err)?,
            sweep_level:      row.try_get("sweep_level").map_err(db_err)?,
            news_sentiment:   parse_col::<Sentiment>(row, "news_sentiment")?,
            social_sentiment: parse_col::<Sentiment>(row, "social_sentiment")?,
            trade_valid:      row.try_get("trade_valid").map_err(db_err)?,
            reason:           row.try_get("reason").map_err(db_err)?,
            provider_used:    row.try_get("provider_used").map_err(db_err)?,
        };
        Ok(Signal {
            id:        row.try_get("id").map_err(db_err)?,
            timestamp: row.try_get("ts").map_err(db_err)?,
            decision,
            executed:  row.try_get("executed").map_err(db_err)?,
        })
    }

    fn trade_from_row(row: &PgRow) -> Result<Trade, ProviderError> {
        let ticket: i64 = row.try_get("ticket").map_err(db_err)?;
        let closed_reason: Option<String> = row.try_get("closed_reason").map_err(db_err)?;
        Ok(Trade {
            id:            row.try_get("id").map_err(db_err)?,
            signal_id:     row.try_get("signal_id").map_err(db_err)?,
            asset:         row.try_get("asset").map_err(db_err)?,
            direction:     parse_col::<Direction>(row, "direction")?,
            pattern:       row.try_get("pattern").map_err(db_err)?,
            entry_price:   row.try_get("entry_price").map_err(db_err)?,
            entry_time:    row.try_get("entry_time").map_err(db_err)?,
            exit_price:    row.try_get("exit_price").map_err(db_err)?,
            exit_time:     row.try_get("exit_time").map_err(db_err)?,
            sl:            row.try_get("sl").map_err(db_err)?,
            tp:            row.try_get("tp").map_err(db_err)?,
            lot_size:      row.try_get("lot_size").map_err(db_err)?,
            ticket:        ticket as u64,
            pnl:           row.try_get("pnl").map_err(db_err)?,
            status:        parse_col::<TradeStatus>(row, "status")?,
            closed_reason: closed_reason
                .map(|r| r.parse::<CloseReason>())
                .transpose()
                .map_err(ProviderError::InvalidFormat)?,
        })
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    async fn save_signal(&self, signal: &Signal) -> Result<(), ProviderError> {
        let d = &signal.decision;
        sqlx::query(&format!(
            r#"
            INSERT INTO signals ({SIGNAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET executed = EXCLUDED.executed
            "#
        ))
        .bind(signal.id)
        .bind(signal.timestamp)
        .bind(&d.asset)
        .bind(d.direction.as_str())
        .bind(d.scenario.as_str())
        .bind(d.confidence as i16)
        .bind(d.entry_price)
        .bind(d.sl_price)
        .bind(d.tp_price)
        .bind(d.rr_ratio)
        .bind(&d.confluences_used)
        .bind(&d.sweep_level)
        .bind(d.news_sentiment.as_str())
        .bind(d.social_sentiment.as_str())
        .bind(d.trade_valid)
        .bind(&d.reason)
        .bind(&d.provider_used)
        .bind(signal.executed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_signal_executed(&self, id: Uuid) -> Result<(), ProviderError> {
        sqlx::query("UPDATE signals SET executed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
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
        let row = sqlx::query(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM signals
            WHERE asset = $1
              AND direction = $2
              AND sweep_level IS NOT DISTINCT FROM $3
              AND ts >= $4
              AND id <> $5
            ORDER BY ts DESC
            LIMIT 1
            "#
        ))
        .bind(asset)
        .bind(direction.as_str())
        .bind(sweep_level)
        .bind(since)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::signal_from_row).transpose()
    }

    async fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>, ProviderError> {
        let rows = sqlx::query(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals ORDER BY ts DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::signal_from_row).collect()
    }

    async fn save_trade(&self, trade: &Trade) -> Result<(), ProviderError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO trades ({TRADE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#
        ))
        .bind(trade.id)
        .bind(trade.signal_id)
        .bind(&trade.asset)
        .bind(trade.direction.as_str())
        .bind(&trade.pattern)
        .bind(trade.entry_price)
        .bind(trade.entry_time)
        .bind(trade.exit_price)
        .bind(trade.exit_time)
        .bind(trade.sl)
        .bind(trade.tp)
        .bind(trade.lot_size)
        .bind(trade.ticket as i64)
        .bind(trade.pnl)
        .bind(trade.status.as_str())
        .bind(trade.closed_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn open_trades(&self) -> Result<Vec<Trade>, ProviderError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE status <> 'closed' ORDER BY entry_time"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::trade_from_row).collect()
    }

    async fn mark_trade_open(&self, id: Uuid) -> Result<(), ProviderError> {
        sqlx::query("UPDATE trades SET status = 'open' WHERE id = $1 AND status = 'submitted'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn close_trade(&self, closure: &TradeClosure) -> Result<bool, ProviderError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE trades
            SET status = 'closed', exit_price = $2, exit_time = $3, pnl = $4, closed_reason = $5
            WHERE id = $1 AND status <> 'closed'
            "#,
        )
        .bind(closure.trade_id)
        .bind(closure.exit_price)
        .bind(closure.exit_time)
        .bind(closure.pnl)
        .bind(closure.reason.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if updated == 0 {
            // already closed (or unknown): nothing else may change
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO daily_quota (asset, day, closed) VALUES ($1, $2, 1)
            ON CONFLICT (asset, day) DO UPDATE SET closed = daily_quota.closed + 1
            "#,
        )
        .bind(&closure.asset)
        .bind(closure.day)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let win: i32 = if closure.pnl > 0.0 { 1 } else { 0 };
        sqlx::query(
            r#"
            INSERT INTO pattern_stats (pattern, asset, total, wins, losses, win_rate, avg_rr, total_pnl)
            VALUES ($1, $2, 1, $3, 1 - $3, $3 * 100.0, $4, $5)
            ON CONFLICT (pattern, asset) DO UPDATE SET
              total     = pattern_stats.total + 1,
              wins      = pattern_stats.wins + EXCLUDED.wins,
              losses    = pattern_stats.losses + EXCLUDED.losses,
              win_rate  = (pattern_stats.wins + EXCLUDED.wins) * 100.0 / (pattern_stats.total + 1),
              avg_rr    = (pattern_stats.avg_rr * pattern_stats.total + EXCLUDED.avg_rr) / (pattern_stats.total + 1),
              total_pnl = pattern_stats.total_pnl + EXCLUDED.total_pnl
            "#,
        )
        .bind(&closure.pattern)
        .bind(&closure.asset)
        .bind(win)
        .bind(closure.realized_rr)
        .bind(closure.pnl)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn closed_trades_on(&self, asset: &str, day: NaiveDate) -> Result<u32, ProviderError> {
        let closed: Option<i32> =
            sqlx::query_scalar("SELECT closed FROM daily_quota WHERE asset = $1 AND day = $2")
                .bind(asset)
                .bind(day)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(closed.unwrap_or(0).max(0) as u32)
    }

    async fn pattern_stats(
        &self,
        pattern: &str,
        asset:   &str,
    ) -> Result<Option<PatternStats>, ProviderError> {
        let row = sqlx::query(
            r#"
            SELECT pattern, asset, total, wins, losses, win_rate, avg_rr, total_pnl
            FROM pattern_stats WHERE pattern = $1 AND asset = $2
            "#,
        )
        .bind(pattern)
        .bind(asset)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };
        let count = |col: &str| -> Result<u32, ProviderError> {
            let v: i32 = row.try_get(col).map_err(db_err)?;
            Ok(v.max(0) as u32)
        };
        Ok(Some(PatternStats {
            pattern:   row.try_get("pattern").map_err(db_err)?,
            asset:     row.try_get("asset").map_err(db_err)?,
            total:     count("total")?,
            wins:      count("wins")?,
            losses:    count("losses")?,
            win_rate:  row.try_get("win_rate").map_err(db_err)?,
            avg_rr:    row.try_get("avg_rr").map_err(db_err)?,
            total_pnl: row.try_get("total_pnl").map_err(db_err)?,
        }))
    }

    async fn control_get(&self, key: &str) -> Result<Option<String>, ProviderError> {
        sqlx::query_scalar("SELECT value FROM bot_control WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn control_set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        sqlx::query(
            r#"
            INSERT INTO bot_control (key, value, updated_at) VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn control_delete(&self, key: &str) -> Result<(), ProviderError> {
        sqlx::query("DELETE FROM bot_control WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn control_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        // LIKE wildcards in the prefix are escaped
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        sqlx::query_scalar("SELECT key FROM bot_control WHERE key LIKE $1 ORDER BY key")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn save_log(&self, entry: &LogEntry) -> Result<(), ProviderError> {
        sqlx::query("INSERT INTO bot_logs (ts, level, target, message) VALUES ($1, $2, $3, $4)")
            .bind(entry.timestamp)
            .bind(&entry.level)
            .bind(&entry.target)
            .bind(&entry.message)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
