//! Generation gateway: `generate(system_prompt, history) -> text`.
//!
//! The gateway is stateless. Callers own the conversation and pass the complete history on
//! every call, so a gateway can be swapped (or scripted in tests) without touching agent state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use procura_core::config::LlmConfig;
use procura_core::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("the model returned no output")]
    NoOutput,
    #[error("generation transport failed: {0}")]
    Transport(String),
    #[error("generation endpoint returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("generation response could not be decoded: {0}")]
    Decode(String),
    #[error("generation client could not be initialised: {0}")]
    ClientInit(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503 | 504 | 529),
            Self::NoOutput | Self::Decode(_) | Self::ClientInit(_) => false,
        }
    }
}

impl From<GenerationError> for ApplicationError {
    fn from(value: GenerationError) -> Self {
        match value {
            GenerationError::ClientInit(message) => Self::Configuration(message),
            other => Self::TransientGeneration(other.to_string()),
        }
    }
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, system_prompt: &str, history: &[Turn])
        -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/v1/chat/completions` endpoint (OpenAI, the Bedrock
/// runtime's OpenAI surface, Ollama). Retries are the caller's concern.
pub struct ChatCompletionsGateway {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for ChatCompletionsGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsGateway")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ChatCompletionsGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| GenerationError::ClientInit(error.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationGateway for ChatCompletionsGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage { role: "system", content: system_prompt });
        }
        messages.extend(
            history.iter().map(|turn| ChatMessage { role: turn.role.as_str(), content: &turn.content }),
        );

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder =
            self.client.post(format!("{}/v1/chat/completions", self.base_url)).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response =
            builder.send().await.map_err(|error| GenerationError::Transport(error.to_string()))?;
        let status = response.status();
        let body =
            response.text().await.map_err(|error| GenerationError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Status { code: status.as_u16(), body: truncate(&body, 500) });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|error| {
            GenerationError::Decode(format!("{error} (body: {})", truncate(&body, 200)))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| strip_reasoning(&content))
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::NoOutput)?;

        debug!(model = %self.model, chars = content.len(), "generation completed");
        Ok(content)
    }
}

/// Drops `<reasoning>...</reasoning>` blocks that reasoning models prepend to their answer.
fn strip_reasoning(content: &str) -> String {
    const OPEN: &str = "<reasoning>";
    const CLOSE: &str = "</reasoning>";

    let mut remaining = content;
    let mut output = String::with_capacity(content.len());
    while let Some(start) = remaining.find(OPEN) {
        output.push_str(&remaining[..start]);
        match remaining[start..].find(CLOSE) {
            Some(end) => remaining = &remaining[start + end + CLOSE.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    output.push_str(remaining);
    output.trim().to_string()
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

/// One call observed by [`ScriptedGateway`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub history: Vec<Turn>,
}

impl RecordedCall {
    /// Content of the final turn, where agents put the task they are asking for.
    pub fn task(&self) -> &str {
        self.history.last().map(|turn| turn.content.as_str()).unwrap_or_default()
    }
}

type Responder = dyn Fn(&RecordedCall) -> Result<String, GenerationError> + Send + Sync;

/// Deterministic gateway for tests and offline runs.
pub struct ScriptedGateway {
    responder: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self { responder: Box::new(responder), calls: Mutex::new(Vec::new()) }
    }

    /// Replays `responses` in order, then reports `NoOutput`.
    pub fn queue(responses: Vec<Result<String, GenerationError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or(Err(GenerationError::NoOutput))
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<String, GenerationError> {
        let call = RecordedCall { system_prompt: system_prompt.to_string(), history: history.to_vec() };
        let result = (self.responder)(&call);
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        result
    }
}
