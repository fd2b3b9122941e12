use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{ApiConfig, CompletionConfig};
use crate::conversation::Message;
use crate::error::VoxchatError;

/// Anything that can turn an assembled prompt into an assistant reply.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, VoxchatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct CompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    has_key: bool,
}

impl CompletionClient {
    pub fn new(api: &ApiConfig, config: &CompletionConfig) -> Result<Self, VoxchatError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms));

        if !api.openai_api_key.is_empty() {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {}", api.openai_api_key);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|e| VoxchatError::Config(format!("invalid API key: {}", e)))?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| VoxchatError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: api.model.clone(),
            has_key: !api.openai_api_key.is_empty(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, VoxchatError> {
        if !self.has_key {
            return Err(VoxchatError::Auth(
                "OpenAI API key is not set. Set openai_api_key in settings.".to_string(),
            ));
        }

        debug!(
            "Sending {} messages to {} ({})",
            messages.len(),
            self.endpoint,
            self.model
        );

        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoxchatError::Network(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoxchatError::from_status(status, &error_detail(&body)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoxchatError::Network(format!("failed to parse response: {}", e)))?;

        let content = first_choice(body)?;
        debug!("Received {} characters from completion API", content.len());
        Ok(content)
    }
}

fn first_choice(body: ChatResponse) -> Result<String, VoxchatError> {
    body.choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| VoxchatError::Network("no choices in response".to_string()))
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_default()
}
