use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::VoxchatError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    pub settings: SettingsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub elevenlabs_api_key: String,
    #[serde(default)]
    pub elevenlabs_voice_id: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            elevenlabs_api_key: String::new(),
            elevenlabs_voice_id: String::new(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettingsConfig {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_true")]
    pub tts_enabled: bool,
}

fn default_assistant_name() -> String {
    "AI".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            tts_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Most recent messages submitted with each turn. Zero sends only the system prompt.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_transcripts_dir")]
    pub transcripts_dir: String,
    #[serde(default = "default_system_prompt_file")]
    pub system_prompt_file: String,
}

fn default_max_messages() -> usize {
    20
}

fn data_dir_fallback() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    })
}

fn config_dir_fallback() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config"))
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    })
}

fn default_transcripts_dir() -> String {
    data_dir_fallback()
        .join("voxchat/transcripts")
        .to_string_lossy()
        .to_string()
}

fn default_system_prompt_file() -> String {
    config_dir_fallback()
        .join("voxchat/system_prompt.txt")
        .to_string_lossy()
        .to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            transcripts_dir: default_transcripts_dir(),
            system_prompt_file: default_system_prompt_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_completion_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_completion_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_completion_timeout_ms() -> u64 {
    60000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_completion_endpoint(),
            timeout_ms: default_completion_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_speech_timeout_ms")]
    pub timeout_ms: u64,
    /// Player command, or "auto" to pick the first known player on PATH.
    #[serde(default = "default_player")]
    pub player: String,
}

fn default_speech_endpoint() -> String {
    "https://api.elevenlabs.io/v1/text-to-speech".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.8
}

fn default_speech_timeout_ms() -> u64 {
    30000
}

fn default_player() -> String {
    "auto".to_string()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: default_speech_endpoint(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            timeout_ms: default_speech_timeout_ms(),
            player: default_player(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            settings: SettingsConfig::default(),
            chat: ChatConfig::default(),
            completion: CompletionConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

/// Keys accepted by [`Config::set`].
pub const SETTING_KEYS: &[&str] = &[
    "openai_api_key",
    "elevenlabs_api_key",
    "elevenlabs_voice_id",
    "model",
    "assistant_name",
    "tts_enabled",
    "max_messages",
    "transcripts_dir",
    "system_prompt_file",
    "completion_endpoint",
    "completion_timeout_ms",
    "speech_endpoint",
    "speech_timeout_ms",
    "stability",
    "similarity_boost",
    "player",
];

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        Self::validate_config_path(path)?;

        if !path.exists() {
            debug!("Config file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        PathBuf::from(&self.chat.transcripts_dir)
    }

    pub fn system_prompt_file(&self) -> PathBuf {
        PathBuf::from(&self.chat.system_prompt_file)
    }

    /// Update one setting by its flat key name. The config is left untouched on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), VoxchatError> {
        let mut updated = self.clone();
        let value = value.trim();

        match key {
            "openai_api_key" => updated.api.openai_api_key = value.to_string(),
            "elevenlabs_api_key" => updated.api.elevenlabs_api_key = value.to_string(),
            "elevenlabs_voice_id" => updated.api.elevenlabs_voice_id = value.to_string(),
            // Blank model or name falls back to the default, like the settings form did
            "model" => {
                updated.api.model = if value.is_empty() {
                    default_model()
                } else {
                    value.to_string()
                }
            }
            "assistant_name" => {
                updated.settings.assistant_name = if value.is_empty() {
                    default_assistant_name()
                } else {
                    value.to_string()
                }
            }
            "tts_enabled" => updated.settings.tts_enabled = parse_bool(key, value)?,
            "max_messages" => updated.chat.max_messages = parse_number(key, value)?,
            "transcripts_dir" => updated.chat.transcripts_dir = value.to_string(),
            "system_prompt_file" => updated.chat.system_prompt_file = value.to_string(),
            "completion_endpoint" => updated.completion.endpoint = value.to_string(),
            "completion_timeout_ms" => updated.completion.timeout_ms = parse_number(key, value)?,
            "speech_endpoint" => updated.speech.endpoint = value.to_string(),
            "speech_timeout_ms" => updated.speech.timeout_ms = parse_number(key, value)?,
            "stability" => updated.speech.stability = parse_number(key, value)?,
            "similarity_boost" => updated.speech.similarity_boost = parse_number(key, value)?,
            "player" => updated.speech.player = value.to_string(),
            other => {
                return Err(VoxchatError::Config(format!(
                    "unknown setting '{}' (known: {})",
                    other,
                    SETTING_KEYS.join(", ")
                )))
            }
        }

        updated.check()?;
        *self = updated;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.check()?;
        Ok(())
    }

    fn check(&self) -> Result<(), VoxchatError> {
        if self.api.model.is_empty() {
            return Err(VoxchatError::Config("model cannot be empty".to_string()));
        }

        if self.chat.transcripts_dir.contains("..") {
            return Err(VoxchatError::Config(
                "transcripts_dir cannot contain path traversal sequences".to_string(),
            ));
        }
        if self.chat.system_prompt_file.contains("..") {
            return Err(VoxchatError::Config(
                "system_prompt_file cannot contain path traversal sequences".to_string(),
            ));
        }

        if self.completion.endpoint.is_empty() {
            return Err(VoxchatError::Config(
                "completion endpoint cannot be empty".to_string(),
            ));
        }
        if self.completion.timeout_ms < 1000 || self.completion.timeout_ms > 300000 {
            return Err(VoxchatError::Config(
                "completion timeout_ms must be between 1000 and 300000".to_string(),
            ));
        }

        if self.speech.endpoint.is_empty() {
            return Err(VoxchatError::Config(
                "speech endpoint cannot be empty".to_string(),
            ));
        }
        if self.speech.timeout_ms < 1000 || self.speech.timeout_ms > 300000 {
            return Err(VoxchatError::Config(
                "speech timeout_ms must be between 1000 and 300000".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.speech.stability) {
            return Err(VoxchatError::Config(
                "stability must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.speech.similarity_boost) {
            return Err(VoxchatError::Config(
                "similarity_boost must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that a config path is safe
    fn validate_config_path(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            return Err(VoxchatError::Config(
                "Config path cannot contain path traversal sequences".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, VoxchatError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(VoxchatError::Config(format!(
            "{} expects true or false, got '{}'",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, VoxchatError> {
    value
        .parse()
        .map_err(|_| VoxchatError::Config(format!("{} expects a number, got '{}'", key, value)))
}
