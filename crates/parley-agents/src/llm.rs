use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use parley_core::config::LlmConfig;

/// Retries after a failed call: 2s, 4s, 8s.
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The model's reply plus token accounting.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Malformed JSON from the model — treated exactly like a network
    /// failure by callers.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("all {attempts} attempts failed: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Capability interface for the LLM backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, LlmError>;
}

/// `chat` plus JSON parsing, stripping a leading fenced code block when the
/// model wraps its answer in one.
pub async fn chat_json<T: DeserializeOwned>(
    client: &dyn LlmClient,
    req: &ChatRequest,
) -> Result<T, LlmError> {
    let outcome = client.chat(req).await?;
    let body = strip_code_fence(&outcome.content);
    serde_json::from_str(body).map_err(|e| LlmError::Parse(format!("{e}: {body}")))
}

/// Call with exponential backoff: the initial attempt plus up to three
/// retries, sleeping 2s / 4s / 8s before each retry.
pub async fn chat_with_retry(
    client: &dyn LlmClient,
    req: &ChatRequest,
) -> Result<ChatOutcome, LlmError> {
    let mut last_err: Option<LlmError> = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = std::time::Duration::from_secs(1 << attempt);
            warn!(attempt, delay_secs = delay.as_secs(), "retrying LLM call");
            tokio::time::sleep(delay).await;
        }
        match client.chat(req).await {
            Ok(outcome) => {
                if attempt > 0 {
                    debug!(attempt, "LLM call succeeded after retry");
                }
                return Ok(outcome);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(LlmError::Exhausted {
        attempts: MAX_RETRIES + 1,
        last: last_err.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Strip one leading markdown code fence (```json … ``` or ``` … ```).
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", …) up to the first newline.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return trimmed,
    };
    rest.rsplit_once("```").map(|(body, _)| body.trim()).unwrap_or(trimmed)
}

/// OpenAI-compatible chat-completions client over `reqwest`.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct CompletionsResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, LlmError> {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        messages.push(serde_json::json!({"role": "system", "content": req.system}));
        for m in &req.messages {
            messages.push(serde_json::json!({
                "role": match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::System => "system",
                },
                "content": m.content,
            }));
        }

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "temperature": req.temperature,
                "max_tokens": req.max_tokens,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))?;

        Ok(ChatOutcome {
            content,
            input_tokens: body.usage.prompt_tokens,
            output_tokens: body.usage.completion_tokens,
        })
    }
}
