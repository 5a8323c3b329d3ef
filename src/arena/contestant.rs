//! Contestant worker: one fan-out unit per configured model.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::gateway::{ChatRequest, CompletionGateway, Message};

use super::session::CancelToken;
use super::types::{ContestantConfig, ContestantResult};

/// Run one contestant to completion and report exactly one result to the
/// coordinator's intake channel.
///
/// The wire model is the override when present; the result is always
/// reported under the ORIGINAL configured name so aggregation keys stay
/// caller-predictable. Any gateway error is converted into an `"[Error]"`
/// marker rather than propagated. The cancellation token is checked before
/// dispatch and again before reporting; a set token suppresses the report
/// (in-flight calls cannot be aborted, only their results dropped).
pub(crate) async fn run_contestant(
    gateway: Arc<dyn CompletionGateway>,
    config: ContestantConfig,
    message: Message,
    cancel: CancelToken,
    tx: mpsc::Sender<ContestantResult>,
) {
    if cancel.is_cancelled() {
        return;
    }

    let req = ChatRequest::new(config.effective_model(), vec![message])
        .sampling(config.sampling.clone());

    let result = match gateway.chat(req).await {
        Ok(resp) => {
            tracing::debug!(
                contestant = %config.name,
                latency_ms = resp.latency.as_millis() as u64,
                "contestant finished"
            );
            ContestantResult {
                name: config.name,
                content: resp.content,
                failed: false,
            }
        }
        Err(err) => {
            tracing::warn!(
                contestant = %config.name,
                model = %config.model_override.as_deref().unwrap_or(&config.name),
                code = err.code(),
                error = %err,
                "contestant call failed"
            );
            ContestantResult {
                name: config.name,
                content: format!("[Error] {err}"),
                failed: true,
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    // The coordinator may already have torn the channel down after a stop;
    // a failed send is equivalent to suppression.
    let _ = tx.send(result).await;
}
