//! Judge stage and best-effort verdict recovery.
//!
//! The judge sees every contestant answer (truncated to a fixed ceiling),
//! and either emits a structured verdict (strict mode) or free text taken
//! directly as the fused answer (lenient mode). Recovery parsing for strict
//! mode never raises: direct parse first, then extraction of the first
//! balanced brace-delimited block, then degradation to a raw outcome that
//! carries the original text.

use serde::{Deserialize, Serialize};

use crate::gateway::{ChatRequest, CompletionGateway, Message, SamplingOptions};

use super::types::ResultAggregate;

// =============================================================================
// Constants
// =============================================================================

/// Per-answer character ceiling before embedding in the judge prompt.
/// Bounds the judge's context when contestants produce long answers.
pub const MAX_CHARS_PER_ANSWER: usize = 6000;

const TRUNCATION_SUFFIX: &str = "\n...(truncated)...";

const STRICT_FORMAT_INSTRUCTION: &str = "\
Respond with a single JSON object and nothing else, using exactly this shape:
{
  \"reviews\": [{\"model\": \"<name>\", \"score\": <0-10>, \"comment\": \"<critique>\"}],
  \"best_model\": \"<name of the strongest answer>\",
  \"fusion_result\": \"<the best fused answer>\"
}";

/// Default system prompt when a judge is configured without one.
pub const DEFAULT_JUDGE_SYSTEM_PROMPT: &str = "\
You are an impartial AI judge. Compare the contestant answers, point out \
their strengths and weaknesses, and produce one best fused answer.";

// =============================================================================
// Types
// =============================================================================

/// Which response contract the judge is held to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// Free-form text is accepted directly as the fused answer.
    #[default]
    Lenient,
    /// The judge is instructed to emit only a JSON verdict; the recovery
    /// parser handles everything it emits anyway.
    Strict,
}

/// Judge configuration for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Wire model identifier for the judge call.
    pub model: String,
    /// System prompt carrying the judging instructions.
    #[serde(default = "default_judge_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub mode: JudgeMode,
    #[serde(default = "default_judge_sampling")]
    pub sampling: SamplingOptions,
}

fn default_judge_system_prompt() -> String {
    DEFAULT_JUDGE_SYSTEM_PROMPT.to_string()
}

fn default_judge_sampling() -> SamplingOptions {
    SamplingOptions::default().temperature(0.2).max_tokens(4096)
}

impl JudgeConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: default_judge_system_prompt(),
            mode: JudgeMode::default(),
            sampling: default_judge_sampling(),
        }
    }

    pub fn strict(mut self) -> Self {
        self.mode = JudgeMode::Strict;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// One per-model review inside a structured verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReview {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub comment: String,
}

/// Structured verdict: per-model reviews, the best model, and a fused
/// answer. Every field is lenient so a partial verdict still parses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub reviews: Vec<ModelReview>,
    #[serde(default)]
    pub best_model: Option<String>,
    #[serde(default)]
    pub fusion_result: String,
}

/// The judge stage's single output. It never raises past this boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgeOutcome {
    /// A verdict was produced (parsed in strict mode, or the raw text taken
    /// as the fused answer in lenient mode).
    Structured(JudgeVerdict),
    /// Structured extraction failed or the call itself errored; `raw` is the
    /// unparsed response text (empty when the call never returned one).
    Raw { marker: String, raw: String },
    /// No judge was configured; no call was made.
    Skipped,
}

// =============================================================================
// Prompt assembly
// =============================================================================

/// Truncate one contestant answer for embedding, with a visible marker.
pub fn truncate_answer(text: &str) -> String {
    if text.chars().count() <= MAX_CHARS_PER_ANSWER {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_CHARS_PER_ANSWER).collect();
    format!("{head}{TRUNCATION_SUFFIX}")
}

fn build_judge_messages(
    config: &JudgeConfig,
    original_prompt: &str,
    aggregate: &ResultAggregate,
) -> Vec<Message> {
    // Sort by name so the judge prompt is deterministic regardless of
    // contestant completion order.
    let mut names: Vec<&String> = aggregate.results().keys().collect();
    names.sort();

    let mut contestant_block = String::new();
    for name in names {
        let result = &aggregate.results()[name];
        let display = truncate_answer(&result.content);
        contestant_block.push_str(&format!(
            "\n=== answer from model [{name}] ===\n{display}\n"
        ));
    }

    let user_content = format!(
        "Original user question:\n{original_prompt}\n\n\
         Below are the contestant answers. Review them against the system \
         prompt instructions, compare their strengths and weaknesses, and \
         produce the best fused answer:\n{contestant_block}"
    );

    let system = match config.mode {
        JudgeMode::Lenient => config.system_prompt.clone(),
        JudgeMode::Strict => {
            format!("{}\n\n{STRICT_FORMAT_INSTRUCTION}", config.system_prompt)
        }
    };

    vec![Message::system(system), Message::user(user_content)]
}

// =============================================================================
// Recovery parsing
// =============================================================================

/// Extract a JSON object from potentially noisy model output.
///
/// Handles pure JSON, JSON wrapped in markdown code fences, and JSON
/// embedded in prose. When no balanced block exists the trimmed input is
/// returned unchanged (and will fail the caller's parse).
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            return &trimmed[..end];
        }
    }

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Find the byte offset just past the matching closing brace, respecting
/// JSON strings so braces inside `"..."` are not counted.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort recovery of a structured verdict from a raw judge response.
/// Never fails: unparseable input degrades to [`JudgeOutcome::Raw`] carrying
/// the original text.
pub fn recover_verdict(raw: &str) -> JudgeOutcome {
    if let Ok(verdict) = serde_json::from_str::<JudgeVerdict>(raw.trim()) {
        return JudgeOutcome::Structured(verdict);
    }

    let candidate = extract_json(raw);
    if let Ok(verdict) = serde_json::from_str::<JudgeVerdict>(candidate) {
        return JudgeOutcome::Structured(verdict);
    }

    JudgeOutcome::Raw {
        marker: "[Error] judge response was not valid structured output".to_string(),
        raw: raw.to_string(),
    }
}

// =============================================================================
// Stage
// =============================================================================

/// Run the judge stage over the full aggregate. Always yields exactly one
/// [`JudgeOutcome`]; provider errors degrade to `Raw` with an error marker.
pub(crate) async fn run_judge(
    gateway: &dyn CompletionGateway,
    config: &JudgeConfig,
    original_prompt: &str,
    aggregate: &ResultAggregate,
) -> JudgeOutcome {
    let messages = build_judge_messages(config, original_prompt, aggregate);
    let req = ChatRequest::new(&config.model, messages).sampling(config.sampling.clone());

    let raw = match gateway.chat(req).await {
        Ok(resp) => resp.content,
        Err(err) => {
            tracing::warn!(model = %config.model, error = %err, "judge call failed");
            return JudgeOutcome::Raw {
                marker: format!("[Error] judge call failed: {err}"),
                raw: String::new(),
            };
        }
    };

    match config.mode {
        JudgeMode::Lenient => JudgeOutcome::Structured(JudgeVerdict {
            reviews: Vec::new(),
            best_model: None,
            fusion_result: raw,
        }),
        JudgeMode::Strict => recover_verdict(&raw),
    }
}
