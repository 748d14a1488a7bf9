//! # engine::decision_parse — Parse AI Response เป็น Decision
//!
//! AI อาจตอบเป็น full keys หรือ compact keys (ประหยัด token):
//!
//! | compact | full               | compact | full               |
//! |---------|--------------------|---------|--------------------|
//! | `a`     | `asset`            | `rr`    | `rr_ratio`         |
//! | `d`     | `direction`        | `cf`    | `confluences_used` |
//! | `s`     | `scenario`         | `sw`    | `sweep_level`      |
//! | `c`     | `confidence`       | `ns`    | `news_sentiment`   |
//! | `e`     | `entry_price`      | `ss`    | `social_sentiment` |
//! | `sl`    | `sl_price`         | `v`     | `trade_valid`      |
//! | `tp`    | `tp_price`         | `r`     | `reason`           |
//!
//! ค่าแบบย่อ: direction `l/s/n`, scenario `r/c/u/n`, sentiment `b/be/n`
//! ขาด `direction`, `confidence` หรือ `trade_valid` → `InvalidFormat`

use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::models::{Decision, Direction, Scenario, Sentiment};

const COMPACT_KEYS: &[(&str, &str)] = &[
    ("a", "asset"),
    ("d", "direction"),
    ("s", "scenario"),
    ("c", "confidence"),
    ("e", "entry_price"),
    ("sl", "sl_price"),
    ("tp", "tp_price"),
    ("rr", "rr_ratio"),
    ("cf", "confluences_used"),
    ("sw", "sweep_level"),
    ("ns", "news_sentiment"),
    ("ss", "social_sentiment"),
    ("v", "trade_valid"),
    ("r", "reason"),
];

/// Decode a provider answer. `asset` and `provider` come from the caller, not
/// from the payload.
pub fn parse_decision(text: &str, asset: &str, provider: &str) -> Result<Decision, ProviderError> {
    let json = extract_json(text)
        .ok_or_else(|| invalid(format!("no JSON object in response: {}", preview(text))))?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| invalid(format!("malformed JSON ({e}): {}", preview(json))))?;
    let Value::Object(raw) = value else {
        return Err(invalid("decision is not a JSON object".into()));
    };
    let obj = expand_keys(raw);

    let direction: Direction = required_str(&obj, "direction")?
        .parse()
        .map_err(invalid)?;

    let confidence = match obj.get("confidence") {
        Some(v) => number(v).ok_or_else(|| invalid("confidence is not a number".into()))?,
        None => return Err(invalid("missing field 'confidence'".into())),
    };
    if !(0.0..=100.0).contains(&confidence) {
        return Err(invalid(format!("confidence {confidence} outside 0..=100")));
    }

    let trade_valid = match obj.get("trade_valid") {
        Some(v) => boolean(v).ok_or_else(|| invalid("trade_valid is not a boolean".into()))?,
        None => return Err(invalid("missing field 'trade_valid'".into())),
    };

    let scenario = match optional_str(&obj, "scenario") {
        Some(s) => s.parse::<Scenario>().map_err(invalid)?,
        None => Scenario::None,
    };

    Ok(Decision {
        asset:            asset.to_string(),
        direction,
        scenario,
        confidence:       confidence.round() as u8,
        entry_price:      obj.get("entry_price").and_then(number),
        sl_price:         obj.get("sl_price").and_then(number),
        tp_price:         obj.get("tp_price").and_then(number),
        rr_ratio:         obj.get("rr_ratio").and_then(number),
        confluences_used: string_list(obj.get("confluences_used")),
        sweep_level:      optional_str(&obj, "sweep_level")
            .filter(|s| !s.eq_ignore_ascii_case("none") && !s.is_empty()),
        news_sentiment:   sentiment(&obj, "news_sentiment"),
        social_sentiment: sentiment(&obj, "social_sentiment"),
        trade_valid,
        reason:           optional_str(&obj, "reason").unwrap_or_default(),
        provider_used:    provider.to_string(),
    })
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn invalid(msg: String) -> ProviderError {
    ProviderError::InvalidFormat(msg)
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

/// ลบ markdown code fences + ข้อความรอบ ๆ แล้วตัดเอาเฉพาะ `{ … }`
fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|inner| inner.trim_end().trim_end_matches("```"))
        .unwrap_or(text);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn expand_keys(raw: Map<String, Value>) -> Map<String, Value> {
    let full_of = |key: &str| COMPACT_KEYS.iter().find(|(short, _)| *short == key).map(|(_, full)| *full);

    let (compact, full): (Vec<_>, Vec<_>) = raw.into_iter().partition(|(k, _)| full_of(k.as_str()).is_some());
    let mut out: Map<String, Value> = full.into_iter().collect();
    // full key wins if both spellings are present
    for (key, value) in compact {
        if let Some(name) = full_of(key.as_str()) {
            out.entry(name.to_string()).or_insert(value);
        }
    }
    out
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str, ProviderError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(Value::Null) => Ok("none"),
        Some(other) => Err(invalid(format!("'{key}' is not a string: {other}"))),
        None => Err(invalid(format!("missing field '{key}'"))),
    }
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn boolean(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn sentiment(obj: &Map<String, Value>, key: &str) -> Sentiment {
    optional_str(obj, key)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_keys() {
        let text = r#"{
            "direction": "long", "scenario": "reversal", "confidence": 78,
            "entry_price": 2046.5, "sl_price": 2041.0, "tp_price": 2058.0, "rr_ratio": 2.1,
            "confluences_used": ["FVG", "asia_high sweep"], "sweep_level": "asia_high",
            "news_sentiment": "bullish", "social_sentiment": "neutral",
            "trade_valid": true, "reason": "sweep + FVG"
        }"#;
        let d = parse_decision(text, "XAUUSD", "claude").unwrap();
        assert_eq!(d.direction, Direction::Long);
        assert_eq!(d.scenario, Scenario::Reversal);
        assert_eq!(d.confidence, 78);
        assert_eq!(d.entry_price, Some(2046.5));
        assert_eq!(d.sweep_level.as_deref(), Some("asia_high"));
        assert_eq!(d.confluences_used.len(), 2);
        assert_eq!(d.news_sentiment, Sentiment::Bullish);
        assert!(d.trade_valid);
        assert_eq!(d.provider_used, "claude");
        assert_eq!(d.asset, "XAUUSD");
    }

    #[test]
    fn parses_compact_keys_inside_markdown_fence() {
        let text = "```json\n{\"d\":\"s\",\"s\":\"c\",\"c\":90,\"e\":18000,\"sl\":18050,\"tp\":17900,\"rr\":2,\"cf\":\"OB\",\"sw\":\"london_low\",\"ns\":\"be\",\"ss\":\"b\",\"v\":true,\"r\":\"break\"}\n```";
        let d = parse_decision(text, "US100", "groq").unwrap();
        assert_eq!(d.direction, Direction::Short);
        assert_eq!(d.scenario, Scenario::Continuation);
        assert_eq!(d.confidence, 90);
        assert_eq!(d.sl_price, Some(18050.0));
        assert_eq!(d.confluences_used, vec!["OB".to_string()]);
        assert_eq!(d.news_sentiment, Sentiment::Bearish);
        assert_eq!(d.social_sentiment, Sentiment::Bullish);
    }

    #[test]
    fn surrounding_prose_is_stripped() {
        let text = "Here is my analysis:\n{\"d\":\"n\",\"c\":20,\"v\":false,\"sw\":\"none\"}\nGood luck.";
        let d = parse_decision(text, "XAUUSD", "claude").unwrap();
        assert_eq!(d.direction, Direction::None);
        assert!(d.sweep_level.is_none());
        assert!(!d.trade_valid);
    }

    #[test]
    fn missing_mandatory_fields_are_invalid_format() {
        for text in [
            r#"{"c": 50, "v": false}"#,
            r#"{"d": "l", "v": true}"#,
            r#"{"d": "l", "c": 50}"#,
            "no json at all",
            r#"{"d": "sideways", "c": 50, "v": false}"#,
            r#"{"d": "l", "c": 150, "v": false}"#,
        ] {
            let err = parse_decision(text, "XAUUSD", "claude").unwrap_err();
            assert!(matches!(err, ProviderError::InvalidFormat(_)), "{text}");
        }
    }

    #[test]
    fn numeric_strings_and_nulls() {
        let text = r#"{"direction":"long","confidence":"88","entry_price":"2000.5","sl_price":null,"trade_valid":"false"}"#;
        let d = parse_decision(text, "XAUUSD", "claude").unwrap();
        assert_eq!(d.confidence, 88);
        assert_eq!(d.entry_price, Some(2000.5));
        assert_eq!(d.sl_price, None);
        assert!(!d.trade_valid);
    }
}
