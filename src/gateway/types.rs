//! Core types for the completion gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// MESSAGES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message content: either plain text or multipart text + image parts.
///
/// Multipart content is only produced by the attachment preprocessor when the
/// target model is vision-capable; everything else stays a plain string on
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The text portion, for logging and size accounting.
    pub fn text(&self) -> &str {
        match self {
            MessageContent::Text(s) => s,
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or(""),
        }
    }
}

/// One part of a multipart message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }
}

// =============================================================================
// SAMPLING OPTIONS
// =============================================================================

/// The fixed allow-list of sampling keys forwarded to the service.
pub const ALLOWED_SAMPLING_KEYS: &[&str] =
    &["temperature", "top_p", "max_tokens", "frequency_penalty"];

/// Sampling parameters for one call. Only supplied values are serialized
/// into the request payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl SamplingOptions {
    /// Build from an untyped key/value map, applying the allow-list.
    /// Unrecognized keys are silently dropped, not errors.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut opts = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "temperature" => opts.temperature = value.as_f64().map(|v| v as f32),
                "top_p" => opts.top_p = value.as_f64().map(|v| v as f32),
                "max_tokens" => opts.max_tokens = value.as_u64().map(|v| v as u32),
                "frequency_penalty" => {
                    opts.frequency_penalty = value.as_f64().map(|v| v as f32)
                }
                _ => {}
            }
        }
        opts
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn frequency_penalty(mut self, fp: f32) -> Self {
        self.frequency_penalty = Some(fp);
        self
    }
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Request for one chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier as it goes on the wire.
    pub model: String,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling parameters; absent fields are not forwarded.
    pub sampling: SamplingOptions,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling: SamplingOptions::default(),
        }
    }

    pub fn sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Response from one chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The answer text from `choices[0].message.content`.
    pub content: String,
    /// Time taken for the request.
    pub latency: Duration,
}
