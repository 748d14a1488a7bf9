//! # routes::monitor
//!
//! **Monitor** — Endpoints สำหรับ Dashboard (อ่านอย่างเดียว)
//!
//! ## Endpoints
//!
//! | Method    | Path                     | Description                                 |
//! |-----------|--------------------------|---------------------------------------------|
//! | GET       | `/api/health`            | liveness + uptime                           |
//! | GET (WS)  | `/ws/monitor`            | WebSocket real-time `EngineEvent` stream    |
//! | GET       | `/api/monitor/stats`     | paused, session phase, open trades, quota   |
//! | GET       | `/api/monitor/signals`   | Signals ล่าสุด (`?limit=`, default 50)       |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    error::AppError,
    models::Scenario,
    state::SharedState,
    store::KEY_BOT_PAUSED,
};

const DEFAULT_SIGNAL_LIMIT: usize = 50;
const MAX_SIGNAL_LIMIT: usize = 500;

// ─── Health ───────────────────────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let now = state.clock.now();
    Json(json!({
        "ok":          true,
        "service":     "sweepline",
        "uptime_secs": (now - state.started_at).num_seconds(),
        "time":        now,
    }))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// GET /api/monitor/stats
pub async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let now = state.clock.now();
    let today = state.session.civil_date(now);

    let paused = state
        .store
        .control_get(KEY_BOT_PAUSED)
        .await?
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let open_trades = state.store.open_trades().await?;

    let mut assets = Vec::with_capacity(state.assets.len());
    for asset in &state.assets {
        let closed_today = state.store.closed_trades_on(asset, today).await?;
        let mut patterns = Vec::new();
        for scenario in [Scenario::Reversal, Scenario::Continuation] {
            if let Some(stats) = state.store.pattern_stats(scenario.as_str(), asset).await? {
                patterns.push(stats);
            }
        }
        assets.push(json!({
            "asset":        asset,
            "closed_today": closed_today,
            "open_trades":  open_trades.iter().filter(|t| &t.asset == asset).count(),
            "patterns":     patterns,
        }));
    }

    Ok(Json(json!({
        "ok":          true,
        "paused":      paused,
        "phase":       state.session.phase(now),
        "civil_date":  today,
        "open_trades": open_trades,
        "assets":      assets,
    })))
}

// ─── Signals ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    pub limit: Option<usize>,
}

/// GET /api/monitor/signals?limit=N — newest first
pub async fn get_signals(
    State(state): State<SharedState>,
    Query(q): Query<SignalsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.limit.unwrap_or(DEFAULT_SIGNAL_LIMIT);
    if limit == 0 || limit > MAX_SIGNAL_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be within 1..={MAX_SIGNAL_LIMIT}"
        )));
    }

    let signals = state.store.recent_signals(limit).await?;
    Ok(Json(json!({
        "ok":      true,
        "count":   signals.len(),
        "signals": signals,
    })))
}

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket แล้ว subscribe event bus
///
/// Dashboard ต่อที่ `ws://localhost:3000/ws/monitor`
/// ทุก EngineEvent จะถูกส่งมาเป็น JSON text frame
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── ส่ง Snapshot ปัจจุบันทันทีที่ต่อ ─────────────────────────────────────
    let snapshot = {
        let now = state.clock.now();
        let open = state.store.open_trades().await.unwrap_or_default();
        let paused = state
            .store
            .control_get(KEY_BOT_PAUSED)
            .await
            .ok()
            .flatten()
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        json!({
            "event":       "SNAPSHOT",
            "phase":       state.session.phase(now),
            "paused":      paused,
            "assets":      state.assets,
            "open_trades": open,
        })
        .to_string()
    };

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return; // Client ปิดก่อน snapshot ส่งได้
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break; // Client disconnect
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Client read ช้าเกินไป, บาง Event ถูก skip
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break, // Channel closed
                }
            }

            // รับ Message จาก Client (Ping / Close)
            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {} // commands are not accepted here
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}
