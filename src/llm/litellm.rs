//! LiteLLM/OpenAI-compatible chat completion client.
//!
//! The client classifies provider throttling (HTTP 429) as
//! [`LlmError::RateLimited`] at the transport boundary, so the worker pool can
//! react to a typed outcome instead of inspecting error text.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::CuratorConfig;
use crate::error::LlmError;

/// Request timeout applied to every HTTP call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are an assistant for a Korean search engine's dictionary team. \
Answer only with the requested format.";

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of a `/chat/completions` call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Parsed `/chat/completions` reply. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    /// `stop`, `length`, ... as reported by the provider.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Single-turn LLM collaborator used by the worker pool.
///
/// Implementations must report provider throttling as
/// [`LlmError::RateLimited`]; every other failure is treated as permanent.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends one prompt and returns the raw text reply.
    async fn call(&self, prompt: &str, temperature: Option<f64>) -> Result<String, LlmError>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for a LiteLLM proxy or any OpenAI-compatible endpoint.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: Client,
}

impl LiteLlmClient {
    /// Builds a client for `api_base` (trailing slashes are dropped).
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            http,
        })
    }

    pub fn from_config(config: &CuratorConfig) -> Result<Self, LlmError> {
        if config.llm_api_base.is_empty() {
            return Err(LlmError::MissingApiBase);
        }
        Self::new(
            config.llm_api_base.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Posts `request` to `/chat/completions`.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let endpoint = format!("{}/chat/completions", self.api_base);

        let mut builder = self
            .http
            .post(&endpoint)
            .header("X-Title", "search-curator")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ChatResponse>()
                .await
                .map_err(|e| LlmError::ParseError(format!("Malformed completion body: {}", e)));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), model = %request.model, "Completion request rejected");
        Err(classify_error(status, &body, retry_after.as_deref()))
    }
}

#[async_trait]
impl LlmClient for LiteLlmClient {
    async fn call(&self, prompt: &str, temperature: Option<f64>) -> Result<String, LlmError> {
        let mut request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        );
        if let Some(t) = temperature {
            request = request.with_temperature(t);
        }

        let response = self.chat(&request).await?;
        response
            .first_content()
            .filter(|content| !content.trim().is_empty())
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Maps a non-success HTTP status to a typed error.
fn classify_error(status: StatusCode, body: &str, retry_after: Option<&str>) -> LlmError {
    let mut message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    if message.is_empty() {
        message = status.to_string();
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(seconds) = retry_after {
            message = format!("{} (retry after {}s)", message, seconds);
        }
        return LlmError::RateLimited(message);
    }

    LlmError::ApiError {
        code: status.as_u16(),
        message,
    }
}
