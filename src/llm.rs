//! Chat-model abstraction and the OpenAI-compatible client.
//!
//! [`ChatModel`] is the seam every responder talks to. The production
//! implementation, [`OpenAiChatModel`], performs a single non-streaming
//! `POST {base_url}/v1/chat/completions` per call with no retry.
//!
//! Failures carry a [`ModelErrorKind`]. The client fills it in from the HTTP
//! status when it has one (401 → `AuthInvalid`, 429 → `RateLimited`). Only
//! when no status is available does [`classify_error_text`] inspect the
//! error message, which is a best-effort last resort.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::LlmConfig;
use crate::credential::CredentialSource;
use crate::models::{Role, Turn};

/// Maximum bytes of an upstream error body kept in a [`ModelError`].
const MAX_SNIPPET_BYTES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    AuthInvalid,
    RateLimited,
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Error for a non-2xx response; the kind comes from the status code.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ModelErrorKind::AuthInvalid,
            429 => ModelErrorKind::RateLimited,
            _ => ModelErrorKind::Other,
        };
        Self {
            kind,
            status: Some(status),
            message: format!("model API error {}: {}", status, snippet(body)),
        }
    }

    /// Error with no structured status; the kind is guessed from the text.
    pub fn from_text(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_error_text(&message),
            status: None,
            message,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ModelError::from_status(status.as_u16(), &e.to_string()),
            None => ModelError::from_text(format!("model transport error: {}", e)),
        }
    }
}

/// Substring classification of an error message (case-insensitive).
///
/// `"401"` → `AuthInvalid`, `"rate limit"` → `RateLimited`, else `Other`.
/// Used only when no HTTP status is available.
pub fn classify_error_text(text: &str) -> ModelErrorKind {
    let lower = text.to_lowercase();
    if lower.contains("401") {
        ModelErrorKind::AuthInvalid
    } else if lower.contains("rate limit") {
        ModelErrorKind::RateLimited
    } else {
        ModelErrorKind::Other
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_SNIPPET_BYTES {
        return trimmed.to_string();
    }
    let mut end = MAX_SNIPPET_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

/// A language model that turns a message list into one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Builds a chat model bound to one credential.
///
/// Direct chat asks for a fresh client per request so that a caller's key
/// never outlives the call that supplied it.
pub trait ChatModelFactory: Send + Sync {
    fn build(&self, credential: CredentialSource) -> Result<Box<dyn ChatModel>, ModelError>;
}

// ============ OpenAI-compatible client ============

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    credential: CredentialSource,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, credential: CredentialSource) -> Result<Self, ModelError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            url: format!(
                "{}/v1/chat/completions",
                config.base_url.trim().trim_end_matches('/')
            ),
            model: config.model.clone(),
            temperature: config.temperature,
            credential,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let api_key = self.credential.resolve().ok_or_else(|| {
            ModelError::new(
                ModelErrorKind::AuthInvalid,
                format!("no API key available from {}", self.credential.describe()),
            )
        })?;

        let started = Instant::now();
        debug!(
            model = %self.model,
            messages = messages.len(),
            credential = %self.credential.describe(),
            "POST {}", self.url
        );

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&ChatCompletionRequest {
                model: &self.model,
                messages,
                temperature: self.temperature,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(
                %status,
                model = %self.model,
                latency_ms = started.elapsed().as_millis(),
                "chat completion returned non-success status"
            );
            return Err(ModelError::from_status(status.as_u16(), &body));
        }

        let out: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ModelError::new(
                ModelErrorKind::Other,
                format!("invalid chat completion response: {}", e),
            )
        })?;

        let content = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| ModelError::new(ModelErrorKind::Other, "model returned no choices"))?;

        info!(
            model = %self.model,
            latency_ms = started.elapsed().as_millis(),
            "chat completion completed"
        );

        Ok(content)
    }
}

/// Factory producing [`OpenAiChatModel`]s that share one [`LlmConfig`].
pub struct OpenAiChatFactory {
    config: LlmConfig,
}

impl OpenAiChatFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl ChatModelFactory for OpenAiChatFactory {
    fn build(&self, credential: CredentialSource) -> Result<Box<dyn ChatModel>, ModelError> {
        Ok(Box::new(OpenAiChatModel::new(&self.config, credential)?))
    }
}
