//! # providers::llm — Claude (primary) / Groq (fallback)
//!
//! ทั้งสองตัวได้ prompt ชุดเดียวกัน ([`SYSTEM_PROMPT`] + [`user_prompt`]) และ
//! คำตอบผ่าน [`parse_decision`] เหมือนกัน ต่างกันแค่ wire format

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::decision_parse::parse_decision;
use crate::engine::prompt::{user_prompt, SYSTEM_PROMPT};
use crate::engine::request::DecisionRequest;
use crate::error::ProviderError;
use crate::models::Decision;
use crate::providers::{ensure_success, DecisionProvider};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const MAX_TOKENS: u32 = 400;

// ─── Anthropic Claude ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model:       &'a str,
    max_tokens:  u32,
    temperature: f32,
    system:      &'a str,
    messages:    Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    client:   reqwest::Client,
    api_key:  Option<String>,
    model:    String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>, model: String) -> Self {
        Self { client, api_key, model, endpoint: ANTHROPIC_URL.to_string() }
    }

    /// Point at a different host (self-hosted proxy).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DecisionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("ANTHROPIC_API_KEY not set".into()))?;

        let prompt = user_prompt(request);
        let body = ClaudeRequest {
            model:       &self.model,
            max_tokens:  MAX_TOKENS,
            temperature: 0.0,
            system:      SYSTEM_PROMPT,
            messages:    vec![ChatMessage { role: "user", content: &prompt }],
        };

        debug!(asset = %request.asset, model = %self.model, "Calling Claude API...");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let data: ClaudeResponse = ensure_success(resp, "claude").await?.json().await?;

        let text = data
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| ProviderError::InvalidFormat("claude returned empty content".into()))?;

        parse_decision(&text, &request.asset, self.name())
    }
}

// ─── Groq (OpenAI-compatible) ─────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model:       &'a str,
    max_tokens:  u32,
    temperature: f32,
    messages:    Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    content: Option<String>,
}

pub struct GroqProvider {
    client:   reqwest::Client,
    api_key:  Option<String>,
    model:    String,
    endpoint: String,
}

impl GroqProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>, model: String) -> Self {
        Self { client, api_key, model, endpoint: GROQ_URL.to_string() }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DecisionProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("GROQ_API_KEY not set".into()))?;

        let prompt = user_prompt(request);
        let body = ChatRequest {
            model:       &self.model,
            max_tokens:  MAX_TOKENS,
            temperature: 0.0,
            messages:    vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user",   content: &prompt },
            ],
        };

        debug!(asset = %request.asset, model = %self.model, "Calling Groq API...");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        let data: ChatResponse = ensure_success(resp, "groq").await?.json().await?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidFormat("groq returned empty content".into()))?;

        parse_decision(&text, &request.asset, self.name())
    }
}
