//! # engine::prompt — สร้าง Prompt สำหรับ Decision Provider
//!
//! System prompt อธิบาย methodology + รูปแบบคำตอบ (compact JSON)
//! User prompt render [`DecisionRequest`] ทั้งก้อนเป็นข้อความ

use std::fmt::Write as _;

use crate::engine::request::DecisionRequest;
use crate::models::{Confluence, KeyLevel};

pub const SYSTEM_PROMPT: &str = r#"You are a disciplined intraday trader applying Smart Money Concepts on the M5 timeframe.

## Methodology
1. Key levels: Asia high/low, London high/low, previous day high/low.
2. A liquidity sweep is price trading through a key level to trigger resting stops.
3. After a sweep, classify the scenario:
   - reversal: price closes back inside the range and reacts from an FVG / OB / iFVG / BB
   - continuation: price holds beyond the level and retests a confluence in the breakout direction
   - unclear: no clean structure → do not trade
4. Entries only from a confluence zone, stop beyond the zone or the sweep extreme, target the
   opposite liquidity. Minimum reward/risk 1.5.
5. Sentiment is secondary context; it never overrides structure.

## Output
Respond with ONE JSON object and nothing else. Compact keys are accepted:
{"d":"l|s|n","s":"r|c|u|n","c":0-100,"e":<entry|null>,"sl":<stop|null>,"tp":<target|null>,
 "rr":<reward/risk|null>,"cf":["<confluence>",...],"sw":"<level name|none>",
 "ns":"b|be|n","ss":"b|be|n","v":true|false,"r":"<reason, max 120 chars>"}

## Rules
- If v is false then e, sl, tp and rr MUST be null.
- If v is true then d is l or s and e, sl, tp, rr are all numbers.
- long: sl < e < tp. short: tp < e < sl.
- When in doubt, v=false."#;

/// Render the request as the user message.
pub fn user_prompt(req: &DecisionRequest) -> String {
    let mut out = String::with_capacity(4096);

    let _ = writeln!(out, "## {} — {} (civil time {})", req.asset, req.timestamp.format("%Y-%m-%d %H:%M UTC"), req.civil_time);
    let _ = writeln!(out, "Current price: {:.2}", req.current_price);
    let _ = writeln!(
        out,
        "Closed trades today: {}/{}",
        req.closed_trades_today, req.max_trades_per_day
    );

    // ── Key levels ────────────────────────────────────────────────────────────
    let _ = writeln!(out, "\n### Key levels");
    let lv = &req.key_levels;
    for (name, level) in [
        ("asia_high", lv.asia_high),
        ("asia_low", lv.asia_low),
        ("london_high", lv.london_high),
        ("london_low", lv.london_low),
        ("prev_day_high", lv.prev_day_high),
        ("prev_day_low", lv.prev_day_low),
    ] {
        let _ = writeln!(out, "- {name}: {}", fmt_level(level));
    }

    // ── Sweeps ────────────────────────────────────────────────────────────────
    let _ = writeln!(out, "\n### Liquidity sweeps");
    if req.sweeps.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for s in &req.sweeps {
        let _ = writeln!(
            out,
            "- {} @ {:.2} breached {} → {}",
            s.level_name,
            s.level_price,
            s.breach_timestamp.format("%H:%M UTC"),
            s.reaction_tag.as_str()
        );
    }
    if let Some(level) = req.sweep_level {
        let _ = writeln!(out, "Latest swept level: {level}");
    }

    // ── Confluences ───────────────────────────────────────────────────────────
    let _ = writeln!(out, "\n### Confluences (last {} candles)", req.candles.len().min(20));
    if req.confluences.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for c in &req.confluences {
        let _ = writeln!(out, "- {}", fmt_confluence(c));
    }
    match &req.active_confluence {
        Some(c) => {
            let _ = writeln!(out, "Price is inside: {}", c.label());
        }
        None => {
            let _ = writeln!(out, "Price is not inside any confluence");
        }
    }

    // ── Indicators ────────────────────────────────────────────────────────────
    let ind = &req.indicators;
    let _ = writeln!(out, "\n### Indicators");
    let _ = writeln!(out, "- RSI(14): {}", fmt_opt(ind.rsi14));
    match ind.macd {
        Some(m) => {
            let _ = writeln!(
                out,
                "- MACD(12,26,9): line {:.3} | signal {:.3} | hist {:+.3}",
                m.line, m.signal, m.histogram
            );
        }
        None => {
            let _ = writeln!(out, "- MACD(12,26,9): N/A");
        }
    }
    let _ = writeln!(
        out,
        "- EMA20 {} | EMA50 {} | EMA200 {}",
        fmt_opt(ind.ema20),
        fmt_opt(ind.ema50),
        fmt_opt(ind.ema200)
    );
    let _ = writeln!(out, "- ATR(14): {}", fmt_opt(ind.atr14));

    // ── Sentiment / history ───────────────────────────────────────────────────
    let _ = writeln!(out, "\n### Sentiment");
    let _ = writeln!(out, "- news: {}", req.news_sentiment.as_str());
    let _ = writeln!(out, "- social: {}", req.social_sentiment.as_str());

    let _ = writeln!(out, "\n### Past performance ({})", req.asset);
    if req.pattern_stats.is_empty() {
        let _ = writeln!(out, "- no closed trades yet");
    }
    for (pattern, s) in &req.pattern_stats {
        let _ = writeln!(
            out,
            "- {pattern}: {} trades, win rate {:.0}%, avg RR {:.2}",
            s.total, s.win_rate, s.avg_rr
        );
    }

    // ── Candles (most recent last) ────────────────────────────────────────────
    let _ = writeln!(out, "\n### Last candles (M5, time = close, UTC)");
    let tail = req.candles.len().saturating_sub(20);
    for c in &req.candles[tail..] {
        let _ = writeln!(
            out,
            "{} O {:.2} H {:.2} L {:.2} C {:.2}",
            c.time.format("%H:%M"),
            c.open,
            c.high,
            c.low,
            c.close
        );
    }

    let _ = write!(out, "\nRespond with the JSON object only.");
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "N/A".to_string())
}

fn fmt_level(level: Option<KeyLevel>) -> String {
    level
        .map(|l| format!("{:.2}", l.price))
        .unwrap_or_else(|| "not set".to_string())
}

fn fmt_confluence(c: &Confluence) -> String {
    let mut s = c.label();
    if c.filled {
        s.push_str(" (filled)");
    }
    if let Some(t) = c.flipped_at {
        let _ = write!(s, " flipped {}", t.format("%H:%M"));
    }
    s
}
