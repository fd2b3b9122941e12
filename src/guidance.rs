use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Please respond in a conversational tone, providing thoughtful and detailed answers. Feel free to ask clarifying questions when needed.";

/// Used when the prompt file exists but cannot be used.
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Read the system prompt, creating the file with the default prompt if it is missing.
pub fn load(path: &Path) -> String {
    if !path.exists() {
        info!("System prompt file not found at {:?}, creating default", path);
        if let Err(e) = save(path, DEFAULT_SYSTEM_PROMPT) {
            warn!("Failed to create system prompt file: {}", e);
        }
        return DEFAULT_SYSTEM_PROMPT.to_string();
    }

    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => {
            warn!("System prompt file {:?} is empty, using fallback", path);
            FALLBACK_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            warn!("Failed to read system prompt file {:?}: {}", path, e);
            FALLBACK_SYSTEM_PROMPT.to_string()
        }
    }
}

pub fn save(path: &Path, prompt: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create prompt dir: {:?}", parent))?;
    }

    std::fs::write(path, prompt)
        .with_context(|| format!("Failed to write system prompt file: {:?}", path))?;
    Ok(())
}
