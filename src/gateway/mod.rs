//! Completion gateway: one chat endpoint behind a fixed retry policy.

pub mod error;
pub mod siliconflow;
pub mod types;

use std::time::Duration;

use tokio::time::sleep;

use siliconflow::{ChatProvider, SiliconFlowAdapter};

pub use error::{ErrorContext, ErrorKind};
pub use types::*;

/// Trait for issuing completion calls with retries applied.
#[async_trait::async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ErrorKind>;
}

/// Retry policy knobs. Two extra attempts (3 total) on retryable failures;
/// server errors wait a short fixed delay, network failures a slightly
/// longer one.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub server_retry_delay: Duration,
    pub network_retry_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            server_retry_delay: Duration::from_secs(2),
            network_retry_delay: Duration::from_secs(3),
        }
    }
}

impl GatewayConfig {
    fn retry_delay(&self, err: &ErrorKind) -> Duration {
        match err {
            ErrorKind::NetworkFailure(_) => self.network_retry_delay,
            _ => self.server_retry_delay,
        }
    }
}

/// The completion service client: wraps a provider adapter and owns the
/// retry loop. Retry state (attempt counter, last error) lives only for the
/// duration of one `chat` call.
pub struct CompletionClient<P: ChatProvider> {
    provider: P,
    config: GatewayConfig,
}

impl CompletionClient<SiliconFlowAdapter> {
    /// Build a client over the default adapter from environment variables.
    pub fn from_env() -> Result<Self, ErrorKind> {
        Ok(Self::new(SiliconFlowAdapter::from_env()?))
    }
}

impl<P: ChatProvider> CompletionClient<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, GatewayConfig::default())
    }

    pub fn with_config(provider: P, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ErrorKind> {
        let mut last_error: Option<ErrorKind> = None;

        for attempt in 0..=self.config.max_retries {
            match self.provider.chat(&req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = self.config.retry_delay(&err);
                    tracing::warn!(
                        model = %req.model,
                        attempt = attempt + 1,
                        code = err.code(),
                        error = %err,
                        "completion attempt failed, retrying"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ErrorKind::Unknown("retry loop exhausted".into())))
    }
}

#[async_trait::async_trait]
impl<P: ChatProvider> CompletionGateway for CompletionClient<P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ErrorKind> {
        CompletionClient::chat(self, req).await
    }
}
