use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxchat::config::{Config, SETTING_KEYS};
use voxchat::console;
use voxchat::conversation::ConversationStore;
use voxchat::guidance;
use voxchat::library::TranscriptLibrary;
use voxchat::messages::SessionEvent;
use voxchat::playback::{AudioOutput, AudioPlayer};
use voxchat::speech::{SpeechBackend, SpeechClient};

#[derive(Parser)]
#[command(name = "voxchat")]
#[command(about = "Chat with an OpenAI-compatible model and hear the replies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation (default)
    Chat,
    /// List saved conversations
    List,
    /// Print a saved conversation
    Show {
        /// Title, file name, or path of the conversation
        name: String,
    },
    /// Delete a saved conversation
    Delete {
        /// Title, file name, or path of the conversation
        name: String,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show or replace the system prompt
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Speak a line of text with the configured voice
    Say {
        text: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings (API keys are masked)
    Show,
    /// Print the config file location
    Path,
    /// Change one setting
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum PromptAction {
    /// Print the system prompt
    Show,
    /// Replace the system prompt
    Set { text: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| dirs::config_dir().map(|d| d.join("voxchat/config.toml")))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let config = Config::load(&config_path).await?;

        match cli.command {
            Some(Commands::Chat) | None => {
                info!("Starting chat with model {}", config.api.model);
                console::run(config, config_path.clone()).await
            }
            Some(Commands::List) => list_transcripts(&config),
            Some(Commands::Show { name }) => show_transcript(&config, &name),
            Some(Commands::Delete { name }) => delete_transcript(&config, &name),
            Some(Commands::Config { action }) => match action {
                ConfigAction::Show => show_config(&config),
                ConfigAction::Path => {
                    println!("{}", config_path.display());
                    Ok(())
                }
                ConfigAction::Set { key, value } => set_config(config, &config_path, &key, &value).await,
            },
            Some(Commands::Prompt { action }) => match action {
                PromptAction::Show => {
                    println!("{}", guidance::load(&config.system_prompt_file()).trim_end());
                    Ok(())
                }
                PromptAction::Set { text } => {
                    guidance::save(&config.system_prompt_file(), text.trim())?;
                    println!("System prompt updated.");
                    Ok(())
                }
            },
            Some(Commands::Say { text }) => say(&config, &text).await,
        }
    });

    // Stdin reads run on a blocking thread that would otherwise hold up exit
    rt.shutdown_timeout(Duration::from_millis(200));
    result
}

fn list_transcripts(config: &Config) -> Result<()> {
    let library = TranscriptLibrary::open(&config.transcripts_dir())?;
    let list = library.list()?;
    println!("{}", console::render(&SessionEvent::Transcripts(list)));
    Ok(())
}

fn show_transcript(config: &Config, name: &str) -> Result<()> {
    let library = TranscriptLibrary::open(&config.transcripts_dir())?;
    let path = library.resolve(name)?;

    let mut store = ConversationStore::new();
    let header = store.import(&path)?;
    let title = header.title.unwrap_or_else(|| name.to_string());

    println!(
        "{}",
        console::render(&SessionEvent::ConversationLoaded {
            title,
            assistant_name: config.settings.assistant_name.clone(),
            messages: store.messages().to_vec(),
        })
    );
    Ok(())
}

fn delete_transcript(config: &Config, name: &str) -> Result<()> {
    let library = TranscriptLibrary::open(&config.transcripts_dir())?;
    let path = library.delete(name)?;
    println!("Deleted {}", path.display());
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        let skip = secret.chars().count().saturating_sub(4);
        format!("****{}", secret.chars().skip(skip).collect::<String>())
    }
}

fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    shown.api.openai_api_key = mask(&config.api.openai_api_key);
    shown.api.elevenlabs_api_key = mask(&config.api.elevenlabs_api_key);
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

async fn set_config(mut config: Config, path: &Path, key: &str, value: &str) -> Result<()> {
    if let Err(e) = config.set(key, value) {
        anyhow::bail!("{}\nKnown settings: {}", e, SETTING_KEYS.join(", "));
    }
    config.save(path).await?;
    println!("Setting '{}' updated.", key);
    Ok(())
}

async fn say(config: &Config, text: &str) -> Result<()> {
    let player = AudioPlayer::new(&config.speech);
    if !player.is_available() {
        anyhow::bail!(
            "No audio player found. Install one of mpv, ffplay, mpg123 or play, or set 'player'."
        );
    }
    let speech = SpeechClient::new(&config.api, &config.speech)?;
    let audio = speech.synthesize(text).await?;
    player.play(audio).await?;
    Ok(())
}
