use async_trait::async_trait;
use eyre::{Result, WrapErr};
use lane_pilot_lib::{Conversation, ModelConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of the text returned in place of a model answer on failure
pub const ERROR_SENTINEL_PREFIX: &str = "Error communicating with model";

/// Hosted vision-language model, seen as conversation in, text out.
///
/// Implementations never fail: transport and service errors come back as
/// error-sentinel text, which downstream parsing treats like any other
/// unusable answer.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, conversation: &Conversation) -> String;
}

pub fn error_sentinel(reason: &str) -> String {
    format!("{}: {}", ERROR_SENTINEL_PREFIX, reason)
}

pub fn is_error_sentinel(text: &str) -> bool {
    text.starts_with(ERROR_SENTINEL_PREFIX)
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a Conversation,
    response_format: ResponseFormat,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn first_choice_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| eyre::eyre!("model response contained no message content"))
}

/// Client for an OpenAI-compatible `chat/completions` endpoint
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    /// Build from config, reading the key from the variable named by `api_key_env`.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());

        if api_key.is_none() {
            warn!(
                "{} is not set, sending model requests without authorization",
                config.api_key_env
            );
        }

        Self::new(config.clone(), api_key)
    }

    pub fn new(config: ModelConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn request_body<'a>(&'a self, conversation: &'a Conversation) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: conversation,
            response_format: ResponseFormat { kind: "text" },
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            frequency_penalty: self.config.frequency_penalty,
            presence_penalty: self.config.presence_penalty,
        }
    }

    async fn request(&self, conversation: &Conversation) -> Result<String> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&self.request_body(conversation));

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .wrap_err("model request failed")?
            .error_for_status()
            .wrap_err("model returned an error status")?
            .json::<ChatResponse>()
            .await
            .wrap_err("model response decode failed")?;

        first_choice_text(response)
    }
}

#[async_trait]
impl VisionModel for ChatCompletionsClient {
    async fn complete(&self, conversation: &Conversation) -> String {
        let attempts = self.config.max_retries + 1;
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.request(conversation).await {
                Ok(text) => {
                    debug!("Model answered on attempt {}/{}", attempt, attempts);
                    return text;
                }
                Err(e) => {
                    reason = e
                        .chain()
                        .map(|cause| cause.to_string())
                        .collect::<Vec<_>>()
                        .join(": ");
                    warn!("Model request attempt {}/{} failed: {}", attempt, attempts, reason);
                }
            }
        }

        error_sentinel(&reason)
    }
}
