//! # providers::mt5 — MT5 HTTP Bridge
//!
//! ## Bridge API Contract (ฝั่ง EA / bridge)
//!
//! | Method | Path                          | Body / Query                          |
//! |--------|-------------------------------|---------------------------------------|
//! | GET    | `/candles`                    | `symbol`, `timeframe=M5`, `count`     |
//! | GET    | `/account`                    | —                                     |
//! | GET    | `/symbol/{symbol}`            | — (404 = ไม่มี symbol นี้)             |
//! | POST   | `/order/send`                 | [`BridgeOrder`]                       |
//! | GET    | `/positions`                  | `magic`                               |
//! | POST   | `/position/close`             | `{ticket, magic}`                     |
//! | GET    | `/history/position/{ticket}`  | — (404 = ยังไม่มี deal history)        |
//!
//! `/order/send` คืน `{ "retcode": 10009, "order": 123456, "comment": "..." }`
//! retcode 10009 = `TRADE_RETCODE_DONE` (สำเร็จ) ค่าอื่น = broker ปฏิเสธ
//!
//! Bar `time` จาก bridge เป็นเวลาเปิดแท่ง (unix seconds) → แปลงเป็นเวลาปิดแท่ง

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::models::candle::CANDLE_PERIOD_MINUTES;
use crate::models::{Candle, ClosedPosition, Direction, OrderRequest, Position, SymbolSpec};
use crate::providers::{ensure_success, ExecutionProvider};

/// MT5 Return Code — 10009 = TRADE_RETCODE_DONE
pub const RETCODE_DONE: u32 = 10009;
/// Magic number ของ bot นี้ (แยก position ของเราออกจาก manual trades)
pub const BOT_MAGIC: u64 = 123456;
/// Max slippage (points)
pub const MAX_DEVIATION: u32 = 20;

/// Broker-specific names tried in order for an internal asset id.
fn symbol_aliases(asset: &str) -> Vec<String> {
    match asset {
        "US100" => vec!["US100.cash".into(), "US100".into(), "NAS100.cash".into(), "NAS100".into()],
        other => vec![other.to_string()],
    }
}

// ─── Wire Shapes ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BridgeCandle {
    /// open time, unix seconds
    time:        i64,
    open:        f64,
    high:        f64,
    low:         f64,
    close:       f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct BridgeAccount {
    balance: f64,
}

#[derive(Debug, Deserialize)]
struct BridgeSymbol {
    trade_tick_size:  f64,
    trade_tick_value: f64,
    volume_min:       f64,
    volume_max:       f64,
    volume_step:      f64,
}

/// Payload ที่ส่งไปยัง `/order/send`
#[derive(Debug, Serialize)]
pub struct BridgeOrder {
    pub symbol:    String,
    pub action:    &'static str, // "BUY" | "SELL"
    pub volume:    f64,
    pub price:     f64,
    pub sl:        f64,
    pub tp:        f64,
    pub deviation: u32,
    pub magic:     u64,
    pub comment:   String,
}

#[derive(Debug, Deserialize)]
struct BridgeOrderResponse {
    retcode: u32,
    order:   Option<u64>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeDeal {
    ticket:     u64,
    price:      f64,
    /// unix seconds
    time:       i64,
    profit:     f64,
    #[serde(default)]
    commission: f64,
    #[serde(default)]
    swap:       f64,
}

#[derive(Debug, Serialize)]
struct CloseRequest {
    ticket: u64,
    magic:  u64,
}

#[derive(Debug, Deserialize)]
struct CloseResponse {
    retcode: u32,
    comment: Option<String>,
}

// ─── Bridge ───────────────────────────────────────────────────────────────────

pub struct Mt5Bridge {
    client:   reqwest::Client,
    base_url: String,
    /// asset → resolved broker symbol
    symbols:  RwLock<HashMap<String, String>>,
}

impl Mt5Bridge {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Resolve (and cache) the broker's name for `asset`.
    async fn resolve(&self, asset: &str) -> Result<String, ProviderError> {
        if let Some(s) = self.symbols.read().await.get(asset) {
            return Ok(s.clone());
        }
        let (symbol, _) = self.fetch_symbol(asset).await?;
        Ok(symbol)
    }

    async fn fetch_symbol(&self, asset: &str) -> Result<(String, BridgeSymbol), ProviderError> {
        for candidate in symbol_aliases(asset) {
            let resp = self
                .client
                .get(self.url(&format!("/symbol/{candidate}")))
                .send()
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            let info: BridgeSymbol = ensure_success(resp, "mt5 symbol").await?.json().await?;
            if candidate != asset {
                debug!(asset, symbol = %candidate, "symbol alias resolved");
            }
            self.symbols.write().await.insert(asset.to_string(), candidate.clone());
            return Ok((candidate, info));
        }
        Err(ProviderError::Rejected(format!("no broker symbol for {asset}")))
    }
}

fn unix(secs: i64) -> Result<DateTime<Utc>, ProviderError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ProviderError::InvalidFormat(format!("bad unix time {secs}")))
}

#[async_trait]
impl ExecutionProvider for Mt5Bridge {
    async fn get_candles(&self, asset: &str, count: usize) -> Result<Vec<Candle>, ProviderError> {
        let symbol = self.resolve(asset).await?;
        let count = count.to_string();
        let resp = self
            .client
            .get(self.url("/candles"))
            .query(&[("symbol", symbol.as_str()), ("timeframe", "M5"), ("count", count.as_str())])
            .send()
            .await?;
        let bars: Vec<BridgeCandle> = ensure_success(resp, "mt5 candles").await?.json().await?;

        let mut candles = bars
            .into_iter()
            .map(|b| {
                Ok(Candle {
                    time:   unix(b.time)? + Duration::minutes(CANDLE_PERIOD_MINUTES),
                    open:   b.open,
                    high:   b.high,
                    low:    b.low,
                    close:  b.close,
                    volume: b.tick_volume,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }

    async fn get_account_balance(&self) -> Result<f64, ProviderError> {
        let resp = self.client.get(self.url("/account")).send().await?;
        let account: BridgeAccount = ensure_success(resp, "mt5 account").await?.json().await?;
        Ok(account.balance)
    }

    async fn get_symbol_pip_value(&self, asset: &str) -> Result<SymbolSpec, ProviderError> {
        let (_, info) = self.fetch_symbol(asset).await?;
        Ok(SymbolSpec {
            pip_size:    info.trade_tick_size,
            pip_value:   info.trade_tick_value,
            volume_min:  info.volume_min,
            volume_max:  info.volume_max,
            volume_step: info.volume_step,
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<u64, ProviderError> {
        let action = match order.direction {
            Direction::Long  => "BUY",
            Direction::Short => "SELL",
            Direction::None  => {
                return Err(ProviderError::Rejected("cannot place order with direction none".into()))
            }
        };
        let payload = BridgeOrder {
            symbol:    self.resolve(&order.asset).await?,
            action,
            volume:    order.lot,
            price:     order.entry,
            sl:        order.sl,
            tp:        order.tp,
            deviation: MAX_DEVIATION,
            magic:     BOT_MAGIC,
            comment:   order.comment.clone(),
        };

        info!(
            symbol = %payload.symbol,
            action,
            volume = payload.volume,
            sl = payload.sl,
            tp = payload.tp,
            "🚀 [MT5] Sending order"
        );

        let resp = self.client.post(self.url("/order/send")).json(&payload).send().await?;
        let body: BridgeOrderResponse = ensure_success(resp, "mt5 order").await?.json().await?;

        // 10009 = TRADE_RETCODE_DONE (เท่านั้นที่ถือว่า success)
        if body.retcode != RETCODE_DONE {
            let msg = format!(
                "MT5 rejected: retcode={} comment={}",
                body.retcode,
                body.comment.as_deref().unwrap_or("unknown")
            );
            warn!("{msg}");
            return Err(ProviderError::Rejected(msg));
        }
        body.order
            .ok_or_else(|| ProviderError::InvalidFormat("order accepted without ticket".into()))
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>, ProviderError> {
        let resp = self
            .client
            .get(self.url("/positions"))
            .query(&[("magic", BOT_MAGIC)])
            .send()
            .await?;
        Ok(ensure_success(resp, "mt5 positions").await?.json().await?)
    }

    async fn close_position(&self, ticket: u64) -> Result<(), ProviderError> {
        let resp = self
            .client
            .post(self.url("/position/close"))
            .json(&CloseRequest { ticket, magic: BOT_MAGIC })
            .send()
            .await?;
        let body: CloseResponse = ensure_success(resp, "mt5 close").await?.json().await?;
        if body.retcode != RETCODE_DONE {
            return Err(ProviderError::Rejected(format!(
                "close rejected: retcode={} comment={}",
                body.retcode,
                body.comment.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(())
    }

    async fn get_closed_position(&self, ticket: u64) -> Result<Option<ClosedPosition>, ProviderError> {
        let resp = self
            .client
            .get(self.url(&format!("/history/position/{ticket}")))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let deal: BridgeDeal = ensure_success(resp, "mt5 history").await?.json().await?;
        Ok(Some(ClosedPosition {
            ticket:     deal.ticket,
            exit_price: deal.price,
            exit_time:  unix(deal.time)?,
            profit:     deal.profit + deal.commission + deal.swap,
        }))
    }
}
