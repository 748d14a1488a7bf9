//! # engine::request — DecisionRequestBuilder
//!
//! รวมทุกอย่างที่ Decision Provider ต้องเห็นเป็น snapshot เดียว (immutable)
//! หนึ่ง request ต่อ (asset, แท่งเทียนที่เพิ่งปิด)
//!
//! - candles / key levels ขาด → fail closed ([`BuildError`])
//! - sentiment / pattern stats ขาด → neutral / ว่าง (ไม่ block)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::confluence::confluence_at;
use crate::engine::indicators::IndicatorSnapshot;
use crate::engine::sweep::latest_level;
use crate::error::BuildError;
use crate::models::{
    Candle, Confluence, KeyLevelSet, LevelName, PatternStats, Sentiment, SweepEvent,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
    pub asset:               String,
    /// Close time of the newest candle
    pub timestamp:           DateTime<Utc>,
    /// Civil wall-clock rendering of `timestamp`
    pub civil_time:          String,
    pub current_price:       f64,
    pub candles:             Vec<Candle>,
    pub key_levels:          KeyLevelSet,
    pub confluences:         Vec<Confluence>,
    pub active_confluence:   Option<Confluence>,
    pub sweeps:              Vec<SweepEvent>,
    pub sweep_level:         Option<LevelName>,
    pub indicators:          IndicatorSnapshot,
    pub news_sentiment:      Sentiment,
    pub social_sentiment:    Sentiment,
    /// scenario → stats for this asset
    pub pattern_stats:       BTreeMap<String, PatternStats>,
    pub closed_trades_today: u32,
    pub max_trades_per_day:  u32,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionRequestBuilder {
    asset:               String,
    civil_time:          Option<String>,
    candles:             Vec<Candle>,
    key_levels:          Option<KeyLevelSet>,
    confluences:         Vec<Confluence>,
    sweeps:              Vec<SweepEvent>,
    indicators:          IndicatorSnapshot,
    news_sentiment:      Option<Sentiment>,
    social_sentiment:    Option<Sentiment>,
    pattern_stats:       BTreeMap<String, PatternStats>,
    closed_trades_today: u32,
    max_trades_per_day:  u32,
}

impl DecisionRequestBuilder {
    pub fn new(asset: &str) -> Self {
        Self { asset: asset.to_string(), ..Self::default() }
    }

    pub fn candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = candles;
        self
    }

    pub fn key_levels(mut self, levels: Option<KeyLevelSet>) -> Self {
        self.key_levels = levels;
        self
    }

    pub fn confluences(mut self, confluences: Vec<Confluence>) -> Self {
        self.confluences = confluences;
        self
    }

    pub fn sweeps(mut self, sweeps: Vec<SweepEvent>) -> Self {
        self.sweeps = sweeps;
        self
    }

    pub fn indicators(mut self, indicators: IndicatorSnapshot) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn sentiment(mut self, news: Option<Sentiment>, social: Option<Sentiment>) -> Self {
        self.news_sentiment = news;
        self.social_sentiment = social;
        self
    }

    pub fn pattern_stats(mut self, stats: impl IntoIterator<Item = PatternStats>) -> Self {
        self.pattern_stats = stats.into_iter().map(|s| (s.pattern.clone(), s)).collect();
        self
    }

    pub fn quota(mut self, closed_today: u32, max_per_day: u32) -> Self {
        self.closed_trades_today = closed_today;
        self.max_trades_per_day = max_per_day;
        self
    }

    pub fn civil_time(mut self, civil: String) -> Self {
        self.civil_time = Some(civil);
        self
    }

    pub fn build(self) -> Result<DecisionRequest, BuildError> {
        let last = *self
            .candles
            .last()
            .ok_or_else(|| BuildError::MissingCandles(self.asset.clone()))?;
        let key_levels = self
            .key_levels
            .ok_or_else(|| BuildError::MissingKeyLevels(self.asset.clone()))?;

        let active_confluence = confluence_at(&self.confluences, last.close);
        let sweep_level = latest_level(&self.sweeps);

        Ok(DecisionRequest {
            asset: self.asset,
            timestamp: last.time,
            civil_time: self.civil_time.unwrap_or_else(|| last.time.to_rfc3339()),
            current_price: last.close,
            candles: self.candles,
            key_levels,
            confluences: self.confluences,
            active_confluence,
            sweeps: self.sweeps,
            sweep_level,
            indicators: self.indicators,
            news_sentiment: self.news_sentiment.unwrap_or_default(),
            social_sentiment: self.social_sentiment.unwrap_or_default(),
            pattern_stats: self.pattern_stats,
            closed_trades_today: self.closed_trades_today,
            max_trades_per_day: self.max_trades_per_day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bias, ConfluenceKind, KeyLevel, SweepReaction, Zone};
    use chrono::{NaiveDate, TimeZone};

    fn make_candle(close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        Candle { time: t, open: close, high: close + 1.0, low: close - 1.0, close, volume: 0.0 }
    }

    fn make_levels() -> KeyLevelSet {
        let mut set = KeyLevelSet::empty(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        set.asia_high = Some(KeyLevel {
            price:     2050.0,
            frozen_at: Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
        });
        set
    }

    #[test]
    fn missing_candles_fail_closed() {
        let err = DecisionRequestBuilder::new("XAUUSD")
            .key_levels(Some(make_levels()))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingCandles("XAUUSD".into()));
    }

    #[test]
    fn missing_levels_fail_closed() {
        let err = DecisionRequestBuilder::new("XAUUSD")
            .candles(vec![make_candle(2000.0)])
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingKeyLevels("XAUUSD".into()));
    }

    #[test]
    fn sentiment_degrades_to_neutral() {
        let req = DecisionRequestBuilder::new("XAUUSD")
            .candles(vec![make_candle(2000.0)])
            .key_levels(Some(make_levels()))
            .sentiment(None, Some(Sentiment::Bullish))
            .build()
            .unwrap();
        assert_eq!(req.news_sentiment, Sentiment::Neutral);
        assert_eq!(req.social_sentiment, Sentiment::Bullish);
        assert!(req.pattern_stats.is_empty());
    }

    #[test]
    fn derives_active_confluence_and_sweep_level() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 13, 50, 0).unwrap();
        let fvg = Confluence {
            kind:       ConfluenceKind::Fvg,
            bias:       Bias::Bullish,
            zone:       Zone { low: 2040.0, high: 2048.0 },
            formed_at:  t,
            filled:     false,
            flipped_at: None,
        };
        let sweep = SweepEvent {
            level_name:       LevelName::AsiaHigh,
            level_price:      2050.0,
            breach_timestamp: t,
            reaction_tag:     SweepReaction::ReversalCandidate,
        };
        let req = DecisionRequestBuilder::new("XAUUSD")
            .candles(vec![make_candle(2045.0)])
            .key_levels(Some(make_levels()))
            .confluences(vec![fvg])
            .sweeps(vec![sweep])
            .build()
            .unwrap();
        assert_eq!(req.active_confluence, Some(fvg));
        assert_eq!(req.sweep_level, Some(LevelName::AsiaHigh));
        assert_eq!(req.current_price, 2045.0);
    }
}
