//! # config — อ่าน Config จาก Environment Variables
//!
//! ทุกค่ามี Default — `from_env()` จะ fail เฉพาะเมื่อค่าที่ตั้งไว้ parse ไม่ได้
//! (ตัวเลขผิดรูปแบบ, timezone ไม่รู้จัก)

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono_tz::Tz;

use crate::engine::confluence::ConfluenceConfig;
use crate::engine::gate::GateConfig;
use crate::engine::resilience::RetryPolicy;
use crate::engine::sweep::SweepConfig;

/// Config ทั้งหมดที่ Engine ต้องการ
#[derive(Debug, Clone)]
pub struct Config {
    // ── Market ────────────────────────────────────────────────────────────────
    /// Symbol ที่จะวิเคราะห์ เช่น "XAUUSD", "US100"
    pub assets:            Vec<String>,
    /// Civil timezone สำหรับ Session ทั้งหมด
    pub timezone:          Tz,

    // ── Loops ─────────────────────────────────────────────────────────────────
    pub analysis_interval: Duration,
    pub monitor_interval:  Duration,
    /// ดึงกี่แท่งตอน warm-up (ต้องพอสำหรับ prev-day levels + EMA200)
    pub history_candles:   usize,
    /// ดึงกี่แท่งต่อ tick หลัง warm แล้ว
    pub recent_candles:    usize,

    // ── Detectors ─────────────────────────────────────────────────────────────
    pub confluence:        ConfluenceConfig,
    pub sweep:             SweepConfig,

    // ── Decision / Gate / Sizing ──────────────────────────────────────────────
    pub llm_timeout:             Duration,
    pub fallback_min_confidence: u8,
    pub gate:                    GateConfig,
    pub risk_fraction:           f64,

    // ── Resilience ────────────────────────────────────────────────────────────
    pub retry_attempts:   u32,
    pub retry_backoff:    Vec<Duration>,
    pub provider_timeout: Duration,

    // ── Providers ─────────────────────────────────────────────────────────────
    pub anthropic_api_key: Option<String>,
    pub claude_model:      String,
    pub groq_api_key:      Option<String>,
    pub groq_model:        String,
    pub newsapi_key:       Option<String>,
    pub reddit_user_agent: String,
    pub twitter_bearer_token: Option<String>,
    pub mt5_base_url:      String,

    // ── Infra ─────────────────────────────────────────────────────────────────
    pub database_url: Option<String>,
    pub bind_addr:    String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let assets: Vec<String> = env_string("ASSETS", "XAUUSD,US100")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if assets.is_empty() {
            bail!("ASSETS must name at least one instrument");
        }

        let tz_name = env_string("TIMEZONE", "Europe/Paris");
        let timezone: Tz = tz_name
            .parse()
            .map_err(|e| anyhow::anyhow!("TIMEZONE '{tz_name}' is not a known IANA zone: {e}"))?;

        let retry_backoff = parse_backoff(&env_string("RETRY_BACKOFF_SECS", "30,60,120"))?;

        let confluence = ConfluenceConfig {
            window:           env_parse("CONFLUENCE_WINDOW", 20)?,
            impulse_atr_mult: env_parse("OB_IMPULSE_ATR_MULT", 2.0)?,
            min_consecutive:  env_parse("OB_MIN_CONSECUTIVE", 3)?,
            ..ConfluenceConfig::default()
        };

        let sweep = SweepConfig {
            lookahead:        env_parse("SWEEP_LOOKAHEAD", 3)?,
            continuation_atr: env_parse("SWEEP_CONTINUATION_ATR", 0.25)?,
            ..SweepConfig::default()
        };

        let gate = GateConfig {
            dedup_window: chrono::Duration::minutes(env_parse("DEDUP_WINDOW_MINUTES", 15)?),
            max_closed_trades_per_day: env_parse("MAX_CLOSED_TRADES_PER_DAY", 2)?,
            ..GateConfig::default()
        };

        let fallback_min_confidence: u8 = env_parse("FALLBACK_MIN_CONFIDENCE", 85)?;
        if fallback_min_confidence > 100 {
            bail!("FALLBACK_MIN_CONFIDENCE must be within 0..=100");
        }

        let risk_fraction: f64 = env_parse("RISK_FRACTION", 0.01)?;
        if !(risk_fraction > 0.0 && risk_fraction < 1.0) {
            bail!("RISK_FRACTION must be within (0, 1)");
        }

        Ok(Self {
            assets,
            timezone,
            analysis_interval: Duration::from_secs(env_parse("ANALYSIS_INTERVAL_SECS", 10)?),
            monitor_interval:  Duration::from_secs(env_parse("MONITOR_INTERVAL_SECS", 30)?),
            history_candles:   env_parse("HISTORY_CANDLES", 600)?,
            recent_candles:    env_parse("RECENT_CANDLES", 60)?,
            confluence,
            sweep,
            llm_timeout:       Duration::from_secs(env_parse("LLM_TIMEOUT", 10)?),
            fallback_min_confidence,
            gate,
            risk_fraction,
            retry_attempts:    3,
            retry_backoff,
            provider_timeout:  Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 15)?),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            claude_model:      env_string("CLAUDE_MODEL", "claude-3-5-sonnet-20241022"),
            groq_api_key:      env_opt("GROQ_API_KEY"),
            groq_model:        env_string("GROQ_MODEL", "llama-3.3-70b-versatile"),
            newsapi_key:       env_opt("NEWSAPI_KEY"),
            reddit_user_agent: env_string("REDDIT_USER_AGENT", "sweepline/0.1"),
            twitter_bearer_token: env_opt("TWITTER_BEARER_TOKEN"),
            mt5_base_url:      env_string("MT5_BASE_URL", "http://localhost:8001"),
            database_url:      env_opt("DATABASE_URL"),
            bind_addr:         env_string("BIND_ADDR", "0.0.0.0:3000"),
        })
    }

    /// Execution bridge / sentiment / store calls: retry transient errors and timeouts.
    pub fn provider_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts:    self.retry_attempts,
            backoff:         self.retry_backoff.clone(),
            attempt_timeout: self.provider_timeout,
            retry_timeouts:  true,
        }
    }

    /// Decision providers: a timeout hands over immediately (primary → fallback,
    /// fallback → no trade), only transient failures are retried.
    pub fn decision_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts:    self.retry_attempts,
            backoff:         self.retry_backoff.clone(),
            attempt_timeout: self.llm_timeout,
            retry_timeouts:  false,
        }
    }
}

// ─── Env Helpers ──────────────────────────────────────────────────────────────

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key}='{raw}' is not valid")),
    }
}

fn parse_backoff(raw: &str) -> anyhow::Result<Vec<Duration>> {
    let steps = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("RETRY_BACKOFF_SECS entry '{s}' is not a number"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if steps.is_empty() {
        bail!("RETRY_BACKOFF_SECS must list at least one delay");
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_parses() {
        let steps = parse_backoff("30, 60,120").unwrap();
        assert_eq!(
            steps,
            vec![Duration::from_secs(30), Duration::from_secs(60), Duration::from_secs(120)]
        );
        assert!(parse_backoff("30,abc").is_err());
        assert!(parse_backoff("").is_err());
    }

    #[test]
    fn decision_policy_does_not_retry_timeouts() {
        let cfg = Config {
            assets:                  vec!["XAUUSD".into()],
            timezone:                chrono_tz::Europe::Paris,
            analysis_interval:       Duration::from_secs(10),
            monitor_interval:        Duration::from_secs(30),
            history_candles:         600,
            recent_candles:          60,
            confluence:              ConfluenceConfig::default(),
            sweep:                   SweepConfig::default(),
            llm_timeout:             Duration::from_secs(10),
            fallback_min_confidence: 85,
            gate:                    GateConfig::default(),
            risk_fraction:           0.01,
            retry_attempts:          3,
            retry_backoff:           vec![Duration::from_secs(30)],
            provider_timeout:        Duration::from_secs(15),
            anthropic_api_key:       None,
            claude_model:            String::new(),
            groq_api_key:            None,
            groq_model:              String::new(),
            newsapi_key:             None,
            reddit_user_agent:       String::new(),
            twitter_bearer_token:    None,
            mt5_base_url:            String::new(),
            database_url:            None,
            bind_addr:               String::new(),
        };
        assert!(!cfg.decision_policy().retry_timeouts);
        assert_eq!(cfg.decision_policy().attempt_timeout, Duration::from_secs(10));
        assert!(cfg.provider_policy().retry_timeouts);
    }
}
