use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxchatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Playback error: {0}")]
    Playback(String),
}

impl VoxchatError {
    /// Map a non-success HTTP status from either remote API to an error kind.
    pub fn from_status(status: reqwest::StatusCode, detail: &str) -> Self {
        let message = if detail.is_empty() {
            format!("API returned status {}", status)
        } else {
            format!("API returned status {}: {}", status, detail)
        };

        match status.as_u16() {
            401 | 403 => VoxchatError::Auth(message),
            429 => VoxchatError::RateLimit(message),
            _ => VoxchatError::Network(message),
        }
    }
}
