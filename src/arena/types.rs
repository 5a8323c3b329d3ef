//! Request, result, and aggregation types for arena rounds.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::SamplingOptions;

use super::judge::{JudgeConfig, JudgeOutcome};
use super::session::Phase;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum ArenaError {
    /// Request rejected at validation, before any dispatch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Coordinator bug: the phase machine was driven out of order.
    #[error("invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// One configured contestant. Immutable once the round starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestantConfig {
    /// Display/aggregation name. Results are always keyed by this, even
    /// when `model_override` changes what goes on the wire.
    pub name: String,
    /// Optional override for the wire model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    /// Per-contestant sampling parameters.
    #[serde(default)]
    pub sampling: SamplingOptions,
}

impl ContestantConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_override: None,
            sampling: SamplingOptions::default(),
        }
    }

    pub fn with_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    /// The model identifier used on the wire: the override if present, else
    /// the configured name.
    pub fn effective_model(&self) -> &str {
        self.model_override.as_deref().unwrap_or(&self.name)
    }
}

/// Full request for one arena round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaRequest {
    /// The user prompt sent to every contestant.
    pub prompt: String,
    /// Contestants to dispatch concurrently.
    pub contestants: Vec<ContestantConfig>,
    /// Judge configuration; `None` skips the judge stage entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeConfig>,
    /// Run the web-search enrichment stage before contesting.
    #[serde(default)]
    pub search_enabled: bool,
    /// Result-count bound for the search stage.
    #[serde(default = "default_search_result_count")]
    pub search_result_count: usize,
    /// Optional session cookie for the search provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_cookie: Option<String>,
    /// Local files attached to the contestant prompts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PathBuf>,
    /// Vision-capable model ids (substring match against the wire model).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vision_models: Vec<String>,
}

fn default_search_result_count() -> usize {
    5
}

impl ArenaRequest {
    pub fn new(prompt: impl Into<String>, contestants: Vec<ContestantConfig>) -> Self {
        Self {
            prompt: prompt.into(),
            contestants,
            judge: None,
            search_enabled: false,
            search_result_count: default_search_result_count(),
            search_cookie: None,
            attachments: Vec::new(),
            vision_models: Vec::new(),
        }
    }

    /// Single-contestant convenience constructor.
    pub fn single(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(prompt, vec![ContestantConfig::new(model)])
    }

    pub fn judge(mut self, judge: JudgeConfig) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn search(mut self, result_count: usize) -> Self {
        self.search_enabled = true;
        self.search_result_count = result_count;
        self
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// One contestant's outcome: either response text, or an `"[Error] ..."`
/// marker when the call failed. Failed contestants occupy a normal slot in
/// the aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ContestantResult {
    /// The ORIGINAL configured name (never the override).
    pub name: String,
    /// Response text or error marker.
    pub content: String,
    /// Whether `content` is an error marker.
    pub failed: bool,
}

/// Fan-in aggregate keyed by configured contestant name. Completeness is
/// judged by the count of recorded results against the dispatched count
/// captured at fan-out, so a late or duplicate arrival can never trip the
/// barrier twice.
#[derive(Debug)]
pub struct ResultAggregate {
    results: HashMap<String, ContestantResult>,
    dispatched: usize,
    received: usize,
}

impl ResultAggregate {
    pub fn new(dispatched: usize) -> Self {
        Self {
            results: HashMap::with_capacity(dispatched),
            dispatched,
            received: 0,
        }
    }

    /// Record one result. First write per contestant wins; returns whether
    /// the result was actually recorded.
    pub fn record(&mut self, result: ContestantResult) -> bool {
        if self.results.contains_key(&result.name) {
            return false;
        }
        self.results.insert(result.name.clone(), result);
        self.received += 1;
        true
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.dispatched
    }

    pub fn results(&self) -> &HashMap<String, ContestantResult> {
        &self.results
    }

    pub fn into_results(self) -> HashMap<String, ContestantResult> {
        self.results
    }
}

/// Monotonic progress counter: recorded contestant results plus one slot for
/// the judge stage (satisfied immediately when the judge is skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

/// Final outcome of one round. `phase` is `Completed` or `Cancelled`; a
/// cancelled round carries whatever results were recorded before the stop.
#[derive(Debug, Serialize)]
pub struct ArenaOutcome {
    pub session_id: Uuid,
    pub phase: Phase,
    /// Search enrichment block, when the search stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<String>,
    pub results: HashMap<String, ContestantResult>,
    pub judge: JudgeOutcome,
    pub progress: Progress,
}

// =============================================================================
// OBSERVER
// =============================================================================

/// Callbacks delivered by the coordinator as the round progresses. All
/// methods default to no-ops; implementations must not block.
pub trait ArenaObserver: Send + Sync {
    fn phase_changed(&self, _phase: Phase) {}
    fn contestant_finished(&self, _name: &str, _content: &str, _progress: Progress) {}
    fn judge_finished(&self, _outcome: &JudgeOutcome, _progress: Progress) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ArenaObserver for NoopObserver {}
