//! Oracle trait and the Anthropic function-calling implementation.
//!
//! The oracle is an injectable capability with a single operation: given a
//! conversation and a function schema, return a JSON object matching that
//! schema. Components never depend on a concrete provider; tests inject the
//! doubles from [`super::testing`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::schemas::validate_against_schema;
use super::types::{
    CancelSignal, ChatMessage, ChatRole, FunctionSchema, TokenUsage, UsageTracker,
};

/// The function-calling capability consulted by the analysis components.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Ask the oracle to answer through the given function schema.
    ///
    /// Implementations must return a value that validates against the
    /// schema, or an oracle error from the §7 taxonomy.
    async fn call_function(
        &self,
        messages: &[ChatMessage],
        schema: &FunctionSchema,
        cancel: &CancelSignal,
    ) -> Result<Value>;
}

/// Configuration for the Anthropic oracle client.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model identifier
    pub model: String,
    /// Per-call budget in seconds
    pub timeout_secs: u64,
    /// Retries per call on retryable failures
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub initial_backoff_ms: u64,
}

impl OracleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 1_000,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// Anthropic Messages API types (tool-use subset).

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    tools: Vec<ApiTool>,
    tool_choice: ApiToolChoice,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct ApiToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Anthropic-backed oracle speaking the Messages API with a forced tool
/// choice, so every answer arrives as a schema-shaped `tool_use` block.
pub struct AnthropicOracle {
    config: OracleConfig,
    http: Client,
    /// In-memory response cache keyed by a digest of (messages, schema).
    cache: Mutex<HashMap<String, Value>>,
    usage: Mutex<UsageTracker>,
}

impl AnthropicOracle {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: OracleConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            cache: Mutex::new(HashMap::new()),
            usage: Mutex::new(UsageTracker::default()),
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    /// Cumulative token usage across all calls.
    pub fn usage(&self) -> UsageTracker {
        *self.usage.lock().expect("usage lock poisoned")
    }

    fn cache_key(messages: &[ChatMessage], schema: &FunctionSchema) -> String {
        let mut hasher = Sha256::new();
        for message in messages {
            hasher.update([match message.role {
                ChatRole::System => 0u8,
                ChatRole::User => 1,
                ChatRole::Assistant => 2,
            }]);
            hasher.update(message.content.as_bytes());
        }
        hasher.update(schema.name.as_bytes());
        hasher.update(schema.parameters.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn call_once(
        &self,
        messages: &[ChatMessage],
        schema: &FunctionSchema,
    ) -> Result<(Value, TokenUsage)> {
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let api_messages: Vec<ApiMessage> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: 4096,
            messages: api_messages,
            system: if system.is_empty() { None } else { Some(system) },
            tools: vec![ApiTool {
                name: schema.name.clone(),
                description: schema.description.clone(),
                input_schema: schema.parameters.clone(),
            }],
            tool_choice: ApiToolChoice {
                choice_type: "tool".to_string(),
                name: schema.name.clone(),
            },
        };

        let url = format!("{}/v1/messages", self.base_url());
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::oracle_timeout(self.config.timeout_secs * 1_000)
                } else {
                    Error::OracleUnavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body)
                .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
                .unwrap_or_else(|_| body.clone());
            return Err(match status.as_u16() {
                401 | 403 => Error::OracleAuth(detail),
                429 => Error::OracleRateLimited(detail),
                _ => Error::OracleUnavailable(format!("{status}: {detail}")),
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::OracleUnavailable(format!("unparseable response: {e}")))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        let value = parsed
            .content
            .into_iter()
            .find(|block| block.block_type == "tool_use")
            .and_then(|block| block.input)
            .ok_or_else(|| {
                Error::schema_violation(&schema.name, "no tool_use block in response")
            })?;

        Ok((value, usage))
    }
}

#[async_trait]
impl Oracle for AnthropicOracle {
    async fn call_function(
        &self,
        messages: &[ChatMessage],
        schema: &FunctionSchema,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let key = Self::cache_key(messages, schema);
        if let Some(hit) = self.cache.lock().expect("cache lock poisoned").get(&key) {
            debug!(function = %schema.name, "oracle cache hit");
            return Ok(hit.clone());
        }

        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout(
                    Duration::from_secs(self.config.timeout_secs),
                    self.call_once(messages, schema),
                ) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::oracle_timeout(self.config.timeout_secs * 1_000)),
                },
            };

            match outcome {
                Ok((value, usage)) => {
                    self.usage.lock().expect("usage lock poisoned").record(usage);
                    if let Err(message) = validate_against_schema(&value, schema) {
                        warn!(
                            function = %schema.name,
                            attempt,
                            %message,
                            "oracle response violated schema"
                        );
                        last_err = Some(Error::schema_violation(&schema.name, message));
                        continue;
                    }
                    self.cache
                        .lock()
                        .expect("cache lock poisoned")
                        .insert(key, value.clone());
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    warn!(function = %schema.name, attempt, error = %err, "oracle call failed");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::OracleUnavailable("retries exhausted".to_string())))
    }
}
