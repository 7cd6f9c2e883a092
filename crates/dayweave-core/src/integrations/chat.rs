//! Chat-completions schedule generator.
//!
//! Works with any OpenAI-compatible `/chat/completions` endpoint. The prompt
//! goes out as the user message and the answer comes back as text for the
//! parser.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::compiler::ConstraintPayload;
use crate::error::GenerationError;
use crate::parser::GeneratorResponse;
use crate::storage::GeneratorConfig;

use super::traits::ScheduleGenerator;

const SYSTEM_PROMPT: &str = "You are a day planner. Answer only with the schedule in the requested format.";

pub struct ChatGenerator {
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl ChatGenerator {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| GenerationError::Request(format!("invalid endpoint '{endpoint}': {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint,
            model: model.into(),
            api_key: api_key.into(),
            temperature: 0.0,
            max_tokens: 8192,
            client,
        })
    }

    /// Build from config, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GenerationError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(
            &config.endpoint,
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs.max(1)),
        )?
        .with_sampling(config.temperature, config.max_tokens))
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some reasoning models leave `content` empty and answer here
    #[serde(default)]
    reasoning: Option<String>,
}

#[async_trait]
impl ScheduleGenerator for ChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        _payload: &ConstraintPayload,
        prompt: &str,
    ) -> Result<GeneratorResponse, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "sending schedule request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "schedule generator returned an error");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| {
                let ReplyMessage { content, reasoning } = choice.message;
                content
                    .filter(|c| !c.trim().is_empty())
                    .or(reasoning.filter(|r| !r.trim().is_empty()))
            })
            .ok_or(GenerationError::Empty)?;

        debug!(chars = text.len(), "schedule generator answered");
        Ok(GeneratorResponse::Text(text))
    }
}
