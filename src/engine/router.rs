//! # engine::router — DecisionRouter
//!
//! ```text
//! Idle → CallingPrimary ─ ok ──────────────────────────────▶ Primary
//!              │ timeout / error (no primary retry on timeout)
//!              ▼
//!        CallingFallback ─ ok (trade_valid forced false unless confidence > 85) ▶ Fallback
//!              │ timeout / error
//!              ▼
//!          Degraded: direction none, reason "llm_unavailable"
//! ```
//!
//! A decision that does not conform (unparseable, or `trade_valid=true` with a
//! missing level) is discarded as `invalid_decision_format`; it does not fall
//! over to the other provider.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::request::DecisionRequest;
use crate::engine::resilience::{call_with_retry, RetryPolicy};
use crate::error::ProviderError;
use crate::models::Decision;
use crate::providers::DecisionProvider;

pub const REASON_LLM_UNAVAILABLE: &str = "llm_unavailable";
pub const REASON_INVALID_FORMAT: &str = "invalid_decision_format";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    Primary,
    Fallback,
    /// Both providers failed
    Degraded,
    /// A provider answered with a non-conforming decision
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedDecision {
    pub decision: Decision,
    pub path:     RoutePath,
}

pub struct DecisionRouter {
    primary:                 Arc<dyn DecisionProvider>,
    fallback:                Arc<dyn DecisionProvider>,
    primary_policy:          RetryPolicy,
    fallback_policy:         RetryPolicy,
    fallback_min_confidence: u8,
}

impl DecisionRouter {
    pub fn new(
        primary:                 Arc<dyn DecisionProvider>,
        fallback:                Arc<dyn DecisionProvider>,
        policy:                  RetryPolicy,
        fallback_min_confidence: u8,
    ) -> Self {
        Self {
            primary,
            fallback,
            primary_policy: policy.clone(),
            fallback_policy: policy,
            fallback_min_confidence,
        }
    }

    pub async fn route(&self, req: &DecisionRequest) -> RoutedDecision {
        let primary_name = self.primary.name().to_string();

        match self.ask(&self.primary, &self.primary_policy, req).await {
            Ok(decision) => {
                info!(asset = %req.asset, provider = %primary_name, "🧠 decision from primary");
                return self.finish(decision, RoutePath::Primary);
            }
            Err(ProviderError::InvalidFormat(msg)) => {
                return discarded(req, &primary_name, &msg);
            }
            Err(err) => {
                warn!(
                    asset = %req.asset,
                    provider = %primary_name,
                    timeout = err.is_timeout(),
                    error = %err,
                    "⚠️ primary decision provider failed, switching to fallback"
                );
            }
        }

        let fallback_name = self.fallback.name().to_string();
        match self.ask(&self.fallback, &self.fallback_policy, req).await {
            Ok(decision) => {
                info!(asset = %req.asset, provider = %fallback_name, "🧠 decision from fallback");
                self.finish(decision, RoutePath::Fallback)
            }
            Err(ProviderError::InvalidFormat(msg)) => discarded(req, &fallback_name, &msg),
            Err(err) => {
                warn!(
                    asset = %req.asset,
                    provider = %fallback_name,
                    error = %err,
                    "❌ both decision providers unavailable, no trade"
                );
                RoutedDecision {
                    decision: Decision::no_trade(&req.asset, REASON_LLM_UNAVAILABLE, "none"),
                    path:     RoutePath::Degraded,
                }
            }
        }
    }

    async fn ask(
        &self,
        provider: &Arc<dyn DecisionProvider>,
        policy:   &RetryPolicy,
        req:      &DecisionRequest,
    ) -> Result<Decision, ProviderError> {
        let mut decision =
            call_with_retry(provider.name(), policy, || provider.decide(req)).await?;

        decision.asset = req.asset.clone();
        decision.provider_used = provider.name().to_string();

        if !decision.trade_valid {
            decision.clear_levels();
        } else if !decision.is_complete_trade() {
            return Err(ProviderError::InvalidFormat(
                "trade_valid=true with missing direction or price levels".into(),
            ));
        }
        Ok(decision)
    }

    fn finish(&self, mut decision: Decision, path: RoutePath) -> RoutedDecision {
        if path == RoutePath::Fallback
            && decision.trade_valid
            && decision.confidence <= self.fallback_min_confidence
        {
            info!(
                asset = %decision.asset,
                confidence = decision.confidence,
                threshold = self.fallback_min_confidence,
                "fallback decision below confidence threshold, trade_valid forced false"
            );
            decision.trade_valid = false;
            decision.clear_levels();
            decision.reason = format!(
                "fallback confidence {} <= {}: {}",
                decision.confidence, self.fallback_min_confidence, decision.reason
            );
        }
        RoutedDecision { decision, path }
    }
}

fn discarded(req: &DecisionRequest, provider: &str, msg: &str) -> RoutedDecision {
    warn!(asset = %req.asset, provider, error = msg, "🗑️ invalid decision format, discarded");
    RoutedDecision {
        decision: Decision::no_trade(&req.asset, REASON_INVALID_FORMAT, provider),
        path:     RoutePath::Discarded,
    }
}
