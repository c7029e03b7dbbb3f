//! LLM-backed structured extraction of side projects from comments.
//!
//! A comment is sent as a single-turn chat completion under a fixed system
//! instruction that demands a JSON object with the project fields, or the
//! reject sentinel `{"name": null}`. The reply is classified three ways:
//!
//! | Reply | Result |
//! |-------|--------|
//! | object with a non-empty string `name` | `Ok(ExtractionResult::Accepted)` |
//! | `name` is absent, `null`, or blank | `Ok(ExtractionResult::Rejected)` |
//! | not JSON, not an object, non-string `name` | `Err(ExtractionError::Malformed)` |
//!
//! [`CompletionClient`] is the transport seam; [`ChatCompletionClient`]
//! speaks the OpenAI-compatible `/chat/completions` protocol used by both
//! OpenAI and DeepSeek.

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::models::{discussion_url, ExtractionRequest, ExtractionResult, ProjectRecord};
use crate::retry::{CircuitBreaker, RetryPolicy};

/// Build the fixed system instruction.
pub fn system_prompt(language: &str) -> String {
    format!(
        r#"You are a data extractor. Extract side project details from the comment.
The comment is from a "Show HN" or "revenue" thread.
Return JSON only: {{ "name": string, "url": string, "description": "short one-sentence description in {lang}", "revenue": "revenue string e.g. $500/mo", "stack": ["tech1", "tech2"] }}.
If the comment does not explicitly mention a project with revenue or is just a meta-comment, return {{ "name": null }}.
IMPORTANT: All returned data must be in {lang}."#,
        lang = language
    )
}

/// Single-attempt chat completion transport.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the model identifier (e.g. `"deepseek-chat"`).
    fn model_name(&self) -> &str;

    /// Send one system + user exchange and return the message content.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractionError>;
}

/// OpenAI-compatible chat completion client.
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionClient {
    /// Create a client, reading the API key from the environment variable
    /// named by the config.
    ///
    /// # Errors
    ///
    /// Returns an error if the key variable is unset or empty.
    pub fn from_env(config: &ExtractionConfig) -> anyhow::Result<Self> {
        let key_env = config.key_env();
        let api_key = match std::env::var(key_env) {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("{} environment variable not set", key_env),
        };
        Ok(Self::with_api_key(config, api_key)?)
    }

    pub fn with_api_key(
        config: &ExtractionConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.endpoint_base()),
            model: config.model_name().to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractionError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Malformed(format!("invalid completion envelope: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractionError::EmptyReply)
    }
}

/// Project fields as the model reported them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedProject {
    pub name: String,
    pub url: String,
    pub description: String,
    pub revenue: String,
    pub stack: Vec<String>,
}

/// A well-formed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Accepted(ExtractedProject),
    Rejected,
}

/// Classify a raw model reply.
pub fn parse_reply(content: &str) -> Result<ModelReply, ExtractionError> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ExtractionError::Malformed(format!("reply is not JSON: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ExtractionError::Malformed("reply is not a JSON object".to_string()))?;

    let name = match obj.get("name") {
        None | Some(Value::Null) => return Ok(ModelReply::Rejected),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(ModelReply::Rejected),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(ExtractionError::Malformed(format!(
                "`name` must be a string, got {}",
                other
            )))
        }
    };

    Ok(ModelReply::Accepted(ExtractedProject {
        name,
        url: text_field(obj, "url"),
        description: text_field(obj, "description"),
        revenue: text_field(obj, "revenue"),
        stack: stack_field(obj),
    }))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn stack_field(obj: &Map<String, Value>) -> Vec<String> {
    match obj.get("stack") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Turns comments into project records. Retries transient transport
/// failures; malformed replies are returned as errors without retry.
#[derive(Clone)]
pub struct ExtractionEngine {
    client: Arc<dyn CompletionClient>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    system_prompt: String,
    web_url: String,
}

impl ExtractionEngine {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        language: &str,
        web_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            breaker,
            system_prompt: system_prompt(language),
            web_url: web_url.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    pub async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        let client = &*self.client;
        let system = self.system_prompt.as_str();
        let text = request.text.as_str();

        let content = self
            .retry
            .run(&self.breaker, || ExtractionError::CircuitOpen, move || {
                client.complete(system, text)
            })
            .await?;

        debug!(item_id = request.item_id, reply = %content, "model reply");

        match parse_reply(&content)? {
            ModelReply::Rejected => Ok(ExtractionResult::Rejected),
            ModelReply::Accepted(p) => Ok(ExtractionResult::Accepted(ProjectRecord {
                name: p.name,
                url: p.url,
                description: p.description,
                revenue: p.revenue,
                stack: p.stack,
                year: request.year,
                author: request.author.clone(),
                source_discussion_url: Some(discussion_url(&self.web_url, request.item_id)),
                reply_count: Some(request.reply_count),
                crawled_at: Some(Utc::now()),
            })),
        }
    }
}
