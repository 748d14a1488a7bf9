//! # providers::sentiment — News / Social Sentiment
//!
//! นับคำ bullish / bearish ในหัวข้อข่าว โพสต์ และ tweet แล้วสรุปเป็น [`Sentiment`]
//! ไม่มี key หรือ asset ไม่รู้จัก → `Neutral` (ไม่ถือว่า error)
//!
//! Social = [`MajoritySentiment`] ของ Reddit + X (Twitter): เสียงข้างมากชนะ เสมอ → `Neutral`

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::models::Sentiment;
use crate::providers::{ensure_success, SentimentProvider};

const NEWSAPI_URL: &str = "https://newsapi.org/v2/everything";
const REDDIT_URL: &str = "https://www.reddit.com";
const TWITTER_SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/recent";
const PAGE_SIZE: u32 = 10;
const TWEETS_PER_QUERY: u32 = 30;

const BULLISH_WORDS: &[&str] = &[
    "surge", "rally", "gain", "rise", "bull", "up", "high", "record",
    "soar", "jump", "boost", "growth", "positive", "strong",
];

const BEARISH_WORDS: &[&str] = &[
    "crash", "fall", "drop", "decline", "bear", "down", "low", "plunge",
    "sink", "loss", "weak", "negative", "fear", "sell",
];

fn news_query(asset: &str) -> Option<&'static str> {
    match asset {
        "XAUUSD" => Some("XAUUSD OR gold"),
        "US100"  => Some("NASDAQ OR US100 OR nasdaq100 OR tech stocks"),
        _        => None,
    }
}

fn tweet_query(asset: &str) -> Option<&'static str> {
    match asset {
        "XAUUSD" => Some("(gold OR XAUUSD OR #gold OR #XAUUSD) lang:en -is:retweet"),
        "US100"  => Some("(nasdaq OR US100 OR #nasdaq OR #NAS100 OR #US100) lang:en -is:retweet"),
        _        => None,
    }
}

fn subreddits(asset: &str) -> &'static [&'static str] {
    match asset {
        "XAUUSD" => &["Forex", "Gold"],
        "US100"  => &["investing", "stocks"],
        _        => &[],
    }
}

/// Majority vote of bullish vs bearish words over every headline.
pub fn score_headlines<'a>(headlines: impl IntoIterator<Item = &'a str>) -> (Sentiment, u32, u32) {
    let (mut bull, mut bear) = (0u32, 0u32);
    for title in headlines {
        for word in title.split_whitespace() {
            let w = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if BULLISH_WORDS.contains(&w.as_str()) {
                bull += 1;
            } else if BEARISH_WORDS.contains(&w.as_str()) {
                bear += 1;
            }
        }
    }
    let sentiment = match bull.cmp(&bear) {
        std::cmp::Ordering::Greater => Sentiment::Bullish,
        std::cmp::Ordering::Less    => Sentiment::Bearish,
        std::cmp::Ordering::Equal   => Sentiment::Neutral,
    };
    (sentiment, bull, bear)
}

// ─── NewsAPI ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Deserialize)]
struct NewsArticle {
    title: Option<String>,
}

pub struct NewsApiSentiment {
    client:  reqwest::Client,
    api_key: Option<String>,
}

impl NewsApiSentiment {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl SentimentProvider for NewsApiSentiment {
    fn name(&self) -> &str {
        "newsapi"
    }

    async fn sentiment(&self, asset: &str) -> Result<Sentiment, ProviderError> {
        let Some(key) = self.api_key.as_deref() else {
            debug!(asset, "NEWSAPI_KEY not set, news sentiment neutral");
            return Ok(Sentiment::Neutral);
        };
        let Some(query) = news_query(asset) else {
            return Ok(Sentiment::Neutral);
        };

        let page_size = PAGE_SIZE.to_string();
        let resp = self
            .client
            .get(NEWSAPI_URL)
            .query(&[
                ("q", query),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("apiKey", key),
            ])
            .send()
            .await?;
        let data: NewsResponse = ensure_success(resp, "newsapi").await?.json().await?;

        let (sentiment, bull, bear) =
            score_headlines(data.articles.iter().filter_map(|a| a.title.as_deref()));
        info!(asset, sentiment = sentiment.as_str(), bull, bear, articles = data.articles.len(), "📰 news sentiment");
        Ok(sentiment)
    }
}

// ─── Reddit ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
}

/// Hot posts of the asset's subreddits via the public JSON listings.
pub struct RedditSentiment {
    client:     reqwest::Client,
    user_agent: String,
}

impl RedditSentiment {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self { client, user_agent }
    }
}

#[async_trait]
impl SentimentProvider for RedditSentiment {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn sentiment(&self, asset: &str) -> Result<Sentiment, ProviderError> {
        let subs = subreddits(asset);
        if subs.is_empty() {
            return Ok(Sentiment::Neutral);
        }

        let mut titles = Vec::new();
        for sub in subs {
            let resp = self
                .client
                .get(format!("{REDDIT_URL}/r/{sub}/hot.json"))
                .query(&[("limit", PAGE_SIZE)])
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .send()
                .await?;
            let listing: Listing = ensure_success(resp, "reddit").await?.json().await?;
            titles.extend(listing.data.children.into_iter().map(|c| c.data.title));
        }

        let (sentiment, bull, bear) = score_headlines(titles.iter().map(String::as_str));
        info!(asset, sentiment = sentiment.as_str(), bull, bear, posts = titles.len(), "💬 social sentiment");
        Ok(sentiment)
    }
}

// ─── X (Twitter) ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TweetSearch {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Deserialize)]
struct Tweet {
    #[serde(default)]
    text: String,
}

/// Recent tweets through the v2 search endpoint (app bearer token).
pub struct TwitterSentiment {
    client:       reqwest::Client,
    bearer_token: Option<String>,
    endpoint:     String,
}

impl TwitterSentiment {
    pub fn new(client: reqwest::Client, bearer_token: Option<String>) -> Self {
        Self { client, bearer_token, endpoint: TWITTER_SEARCH_URL.to_string() }
    }
}

#[async_trait]
impl SentimentProvider for TwitterSentiment {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn sentiment(&self, asset: &str) -> Result<Sentiment, ProviderError> {
        let Some(token) = self.bearer_token.as_deref() else {
            debug!(asset, "TWITTER_BEARER_TOKEN not set, twitter sentiment neutral");
            return Ok(Sentiment::Neutral);
        };
        let Some(query) = tweet_query(asset) else {
            return Ok(Sentiment::Neutral);
        };

        let max_results = TWEETS_PER_QUERY.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .query(&[("query", query), ("max_results", max_results.as_str())])
            .send()
            .await?;
        let data: TweetSearch = ensure_success(resp, "twitter").await?.json().await?;

        let (sentiment, bull, bear) = score_headlines(data.data.iter().map(|t| t.text.as_str()));
        info!(asset, sentiment = sentiment.as_str(), bull, bear, tweets = data.data.len(), "🐦 twitter sentiment");
        Ok(sentiment)
    }
}

// ─── Majority ─────────────────────────────────────────────────────────────────

/// One vote per source; a failing source votes neutral.
pub fn majority(votes: &[Sentiment]) -> Sentiment {
    let bull = votes.iter().filter(|s| **s == Sentiment::Bullish).count();
    let bear = votes.iter().filter(|s| **s == Sentiment::Bearish).count();
    match bull.cmp(&bear) {
        std::cmp::Ordering::Greater => Sentiment::Bullish,
        std::cmp::Ordering::Less    => Sentiment::Bearish,
        std::cmp::Ordering::Equal   => Sentiment::Neutral,
    }
}

/// Combines several sources into one reading (social = Reddit + X).
pub struct MajoritySentiment {
    name:    String,
    sources: Vec<Arc<dyn SentimentProvider>>,
}

impl MajoritySentiment {
    pub fn new(name: impl Into<String>, sources: Vec<Arc<dyn SentimentProvider>>) -> Self {
        Self { name: name.into(), sources }
    }
}

#[async_trait]
impl SentimentProvider for MajoritySentiment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sentiment(&self, asset: &str) -> Result<Sentiment, ProviderError> {
        let mut votes = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.sentiment(asset).await {
                Ok(s) => votes.push(s),
                Err(err) => {
                    warn!(asset, source = source.name(), error = %err, "sentiment source failed, neutral vote");
                    votes.push(Sentiment::Neutral);
                }
            }
        }
        let combined = majority(&votes);
        debug!(asset, combined = combined.as_str(), ?votes, "combined sentiment");
        Ok(combined)
    }
}
