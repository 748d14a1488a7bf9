//! # providers — External collaborators
//!
//! The engine only talks to these traits; the HTTP implementations live in
//! the submodules and the tests plug in fakes.
//!
//! | Trait                  | Implementations                               |
//! |------------------------|-----------------------------------------------|
//! | [`DecisionProvider`]   | `llm::AnthropicProvider` (primary), `llm::GroqProvider` (fallback) |
//! | [`ExecutionProvider`]  | `mt5::Mt5Bridge`                              |
//! | [`SentimentProvider`]  | `sentiment::NewsApiSentiment`, `sentiment::RedditSentiment` |

pub mod llm;
pub mod mt5;
pub mod sentiment;

use async_trait::async_trait;

use crate::engine::request::DecisionRequest;
use crate::error::ProviderError;
use crate::models::{
    Candle, ClosedPosition, Decision, OrderRequest, Position, Sentiment, SymbolSpec,
};

/// Turns a [`DecisionRequest`] into a [`Decision`]. Non-conforming answers
/// come back as `ProviderError::InvalidFormat`.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ProviderError>;
}

/// Market data + order execution (MT5 bridge).
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Closed candles, oldest first.
    async fn get_candles(&self, asset: &str, count: usize) -> Result<Vec<Candle>, ProviderError>;

    async fn get_account_balance(&self) -> Result<f64, ProviderError>;

    /// Live pip value and volume constraints for one lot of `asset`.
    async fn get_symbol_pip_value(&self, asset: &str) -> Result<SymbolSpec, ProviderError>;

    /// Returns the broker ticket.
    async fn place_order(&self, order: &OrderRequest) -> Result<u64, ProviderError>;

    async fn get_open_positions(&self) -> Result<Vec<Position>, ProviderError>;

    async fn close_position(&self, ticket: u64) -> Result<(), ProviderError>;

    /// Deal history for a position that is no longer open; `None` when the
    /// broker has no record (yet).
    async fn get_closed_position(&self, ticket: u64) -> Result<Option<ClosedPosition>, ProviderError>;
}

#[async_trait]
pub trait SentimentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn sentiment(&self, asset: &str) -> Result<Sentiment, ProviderError>;
}

/// Map a non-2xx answer to the retry taxonomy: 429 / 5xx are transient,
/// every other status is a rejection.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let msg = format!("{what} HTTP {status}: {}", body.chars().take(300).collect::<String>());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(ProviderError::Transient(msg))
    } else {
        Err(ProviderError::Rejected(msg))
    }
}
