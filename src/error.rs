//! # error
//!
//! Typed outcomes at every boundary.
//!
//! - [`ProviderError`]  — any call into an external collaborator (LLM, MT5 bridge,
//!   sentiment source, store). Only `Transient` (and `Timeout`, per policy) is retried.
//! - [`GateRejection`]  — why a decision was not executed.
//! - [`SizingError`]    — position sizing refused to produce a lot.
//! - [`BuildError`]     — a decision request could not be assembled.
//! - [`AppError`]       — monitoring HTTP surface; rendered as `{ok:false,error}`.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ─── Provider ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, HTTP 5xx / 429, pool timeout — worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 4xx, broker refusal, missing credentials.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The provider answered but the payload does not conform.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("{call} exhausted after {attempts} attempts: {last}")]
    Exhausted {
        call:     String,
        attempts: u32,
        last:     Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ProviderError::Timeout(_) => true,
            ProviderError::Exhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::InvalidFormat(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::Rejected(err.to_string())
            }
            _ => ProviderError::Transient(err.to_string()),
        }
    }
}

// ─── Gate ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("outside trading session")]
    OutsideSession,

    #[error("invalid decision format")]
    InvalidDecisionFormat,

    #[error("not tradeable: {0}")]
    NotTradeable(String),

    #[error("duplicate signal within dedup window")]
    DuplicateSignal,

    #[error("daily quota exceeded: {closed}/{max} closed trades")]
    QuotaExceeded { closed: u32, max: u32 },

    /// A safety check needed the store and the store was unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

// ─── Sizing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("stop distance must be positive (got {0})")]
    NonPositiveStop(f64),

    #[error("invalid account capital: {0}")]
    InvalidAccount(f64),

    #[error("invalid symbol spec: {0}")]
    InvalidSymbol(String),

    #[error("lot {lots} below broker minimum {min}")]
    BelowMinimumVolume { lots: f64, min: f64 },
}

// ─── Request Build ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("no candles for {0}")]
    MissingCandles(String),

    #[error("no key levels for {0}")]
    MissingKeyLevels(String),
}

// ─── HTTP Surface ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] ProviderError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Store(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
