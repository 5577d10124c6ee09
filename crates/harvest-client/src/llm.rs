use std::time::Duration;

use harvest_core::error::AppError;
use harvest_core::traits::{Completion, CompletionOutput};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const CHAT_COMPLETIONS: &str = "/chat/completions";

/// OpenAI-compatible chat-completions client.
///
/// `base_url` may be the API root (`https://api.openai.com/v1`) or the
/// full endpoint; `/chat/completions` is appended only when missing.
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompletion {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT)
    }

    /// `HARVEST_API_KEY` (required), `HARVEST_MODEL`, `HARVEST_BASE_URL`.
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("HARVEST_API_KEY")
            .map_err(|_| AppError::ConfigError("HARVEST_API_KEY must be set".into()))?;
        let model = std::env::var("HARVEST_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("HARVEST_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(&api_key, &model, &base_url)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        let mut rebuilt = Self::build(&self.api_key, &self.model, &self.endpoint, timeout)?;
        rebuilt.system_prompt = self.system_prompt;
        rebuilt.temperature = self.temperature;
        rebuilt.max_tokens = self.max_tokens;
        Ok(rebuilt)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 2000,
        })
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with(CHAT_COMPLETIONS) {
        base.to_string()
    } else {
        format!("{base}{CHAT_COMPLETIONS}")
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl Completion for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<CompletionOutput, AppError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })?;

        Ok(CompletionOutput {
            content,
            tokens_used: chat.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}
