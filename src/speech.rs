use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{ApiConfig, SpeechConfig};
use crate::error::VoxchatError;

/// Anything that can turn text into playable audio bytes.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoxchatError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Deserialize)]
struct SpeechErrorBody {
    detail: SpeechErrorDetail,
}

#[derive(Deserialize)]
struct SpeechErrorDetail {
    #[serde(default)]
    message: String,
}

/// ElevenLabs text-to-speech client.
pub struct SpeechClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice_id: String,
    stability: f32,
    similarity_boost: f32,
}

impl SpeechClient {
    pub fn new(api: &ApiConfig, config: &SpeechConfig) -> Result<Self, VoxchatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VoxchatError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: api.elevenlabs_api_key.clone(),
            voice_id: api.elevenlabs_voice_id.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}", self.endpoint, self.voice_id)
    }
}

#[async_trait]
impl SpeechBackend for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoxchatError> {
        if self.api_key.is_empty() || self.voice_id.is_empty() {
            return Err(VoxchatError::Auth(
                "ElevenLabs API key or voice ID is not set. Text-to-speech is disabled."
                    .to_string(),
            ));
        }

        debug!("Requesting speech for {} characters", text.len());

        let request = SpeechRequest {
            text,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoxchatError::Network(format!("speech request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoxchatError::from_status(status, &error_detail(&body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoxchatError::Network(format!("failed to read audio: {}", e)))?;

        debug!("Received {} bytes of audio", bytes.len());
        Ok(bytes.to_vec())
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<SpeechErrorBody>(body)
        .map(|b| b.detail.message)
        .unwrap_or_default()
}
