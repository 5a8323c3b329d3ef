//! SiliconFlow adapter for chat completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ErrorKind};
use super::types::{ChatRequest, ChatResponse, Message, SamplingOptions};

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for chat completion providers. One call = one network attempt;
/// retries live a layer above, in [`super::CompletionClient`].
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ErrorKind>;
}

// =============================================================================
// SILICONFLOW ADAPTER
// =============================================================================

const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";

/// Per-attempt wall-clock ceiling. Deliberately generous: large-model
/// responses routinely take minutes, and a low timeout trades correctness
/// for responsiveness.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How much of an error body to keep in error messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// SiliconFlow API adapter for chat completions.
#[derive(Debug, Clone)]
pub struct SiliconFlowAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl SiliconFlowAdapter {
    /// Create from API key. An empty key is rejected here, before any
    /// network call can happen.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ErrorKind> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ErrorKind> {
        let api_key = std::env::var("SILICONFLOW_API_KEY")
            .map_err(|_| ErrorKind::MissingCredential("SILICONFLOW_API_KEY not set".into()))?;

        let base_url = std::env::var("SILICONFLOW_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let timeout = std::env::var("SILICONFLOW_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ErrorKind> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ErrorKind::MissingCredential(
                "API key must not be empty".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ErrorKind::MissingCredential("invalid API key format".into()))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ErrorKind::Unknown(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(flatten)]
    sampling: &'a SamplingOptions,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for SiliconFlowAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ErrorKind> {
        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &req.messages,
            stream: false,
            sampling: &req.sampling,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await?;

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let message = format!("HTTP {}: {}", status.as_u16(), truncate_body(&body));
            return Err(match status.as_u16() {
                500..=599 => ErrorKind::server_error(message, ctx),
                400..=499 => ErrorKind::client_error(message, ctx),
                _ => ErrorKind::Unknown(message),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ErrorKind::protocol_mismatch(format!("invalid JSON body: {e}"), ctx.clone())
        })?;

        // The single field this client consumes: choices[0].message.content.
        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| {
                ErrorKind::protocol_mismatch(
                    format!("no answer content in response: {}", truncate_body(&body)),
                    ctx,
                )
            })?;

        Ok(ChatResponse {
            content,
            latency: start.elapsed(),
        })
    }
}
