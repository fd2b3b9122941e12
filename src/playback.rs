use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SpeechConfig;
use crate::error::VoxchatError;

/// Players tried in order when the configured player is "auto".
const KNOWN_PLAYERS: &[&str] = &["mpv", "ffplay", "mpg123", "play"];

#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoxchatError>;
}

#[derive(Debug, Clone)]
struct Player {
    program: PathBuf,
    args: Vec<String>,
}

fn player_args(name: &str) -> Vec<String> {
    let args: &[&str] = match name {
        "mpv" => &["--no-video", "--really-quiet"],
        "ffplay" => &["-nodisp", "-autoexit", "-loglevel", "quiet"],
        "mpg123" | "play" => &["-q"],
        _ => &[],
    };
    args.iter().map(|a| a.to_string()).collect()
}

fn resolve_player(configured: &str) -> Option<Player> {
    let candidates: Vec<&str> = if configured.is_empty() || configured == "auto" {
        KNOWN_PLAYERS.to_vec()
    } else {
        vec![configured]
    };

    candidates.into_iter().find_map(|name| {
        which::which(name).ok().map(|program| {
            let stem = program
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Player {
                args: player_args(&stem),
                program,
            }
        })
    })
}

/// Plays synthesized speech through an external command-line player.
#[derive(Debug, Clone)]
pub struct AudioPlayer {
    player: Option<Player>,
    temp_dir: PathBuf,
}

impl AudioPlayer {
    pub fn new(config: &SpeechConfig) -> Self {
        let player = resolve_player(&config.player);
        match &player {
            Some(p) => debug!("Audio player: {}", p.program.display()),
            None => debug!("No audio player found (configured: {:?})", config.player),
        }

        Self {
            player,
            temp_dir: std::env::temp_dir().join("voxchat"),
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    pub fn is_available(&self) -> bool {
        self.player.is_some()
    }
}

#[async_trait]
impl AudioOutput for AudioPlayer {
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoxchatError> {
        let player = self.player.as_ref().ok_or_else(|| {
            VoxchatError::Playback(format!(
                "no audio player found; install one of {}",
                KNOWN_PLAYERS.join(", ")
            ))
        })?;

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let audio_file = self
            .temp_dir
            .join(format!("output_{}.mp3", uuid::Uuid::new_v4()));
        tokio::fs::write(&audio_file, &audio).await?;

        info!("Playing {} bytes of speech", audio.len());
        let result = Command::new(&player.program)
            .args(&player.args)
            .arg(&audio_file)
            .output()
            .await;

        // Cleanup
        let _ = tokio::fs::remove_file(&audio_file).await;

        let output = result.map_err(|e| {
            VoxchatError::Playback(format!("failed to run {}: {}", player.program.display(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoxchatError::Playback(format!(
                "{} exited with {}: {}",
                player.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(player: &str) -> SpeechConfig {
        SpeechConfig {
            player: player.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_player_args() {
        assert_eq!(player_args("mpv"), vec!["--no-video", "--really-quiet"]);
        assert_eq!(player_args("mpg123"), vec!["-q"]);
        assert!(player_args("aplay").is_empty());
    }

    #[test]
    fn test_unknown_player_is_unavailable() {
        let player = AudioPlayer::new(&config("definitely-not-a-player-binary"));
        assert!(!player.is_available());
    }

    #[tokio::test]
    async fn test_play_without_player_fails() {
        let temp_dir = TempDir::new().unwrap();
        let player = AudioPlayer::new(&config("definitely-not-a-player-binary"))
            .with_temp_dir(temp_dir.path().to_path_buf());

        let err = player.play(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, VoxchatError::Playback(_)));
    }

    #[tokio::test]
    async fn test_play_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        // `true` accepts any arguments and exits successfully
        let player = AudioPlayer::new(&config("true")).with_temp_dir(temp_dir.path().to_path_buf());
        assert!(player.is_available());

        player.play(vec![0u8; 16]).await.unwrap();
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_play_reports_player_failure() {
        let temp_dir = TempDir::new().unwrap();
        let player = AudioPlayer::new(&config("false")).with_temp_dir(temp_dir.path().to_path_buf());

        let err = player.play(vec![0u8; 16]).await.unwrap_err();
        assert!(matches!(err, VoxchatError::Playback(_)));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
