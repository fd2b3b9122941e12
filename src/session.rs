use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionBackend, CompletionClient};
use crate::config::Config;
use crate::conversation::{ConversationStore, Role, TranscriptHeader};
use crate::error::VoxchatError;
use crate::guidance;
use crate::library::TranscriptLibrary;
use crate::messages::{SessionCommand, SessionEvent};
use crate::playback::{AudioOutput, AudioPlayer};
use crate::prompt;
use crate::speech::{SpeechBackend, SpeechClient};

/// The remote services a session talks to.
pub struct Backends {
    pub completion: Arc<dyn CompletionBackend>,
    pub speech: Arc<dyn SpeechBackend>,
    pub audio: Arc<dyn AudioOutput>,
}

impl Backends {
    pub fn from_config(config: &Config) -> Result<Self, VoxchatError> {
        let completion = CompletionClient::new(&config.api, &config.completion)?;
        debug!("Completion client ready for model {}", completion.model());

        let audio = AudioPlayer::new(&config.speech);
        if config.settings.tts_enabled && !audio.is_available() {
            warn!("Speech is enabled but no audio player was found; replies will not be spoken");
        }

        Ok(Self {
            completion: Arc::new(completion),
            speech: Arc::new(SpeechClient::new(&config.api, &config.speech)?),
            audio: Arc::new(audio),
        })
    }
}

/// Result of a background task, delivered back to the session loop.
enum TaskOutcome {
    Reply {
        generation: u64,
        result: Result<String, VoxchatError>,
    },
    Spoken(Result<(), VoxchatError>),
}

/// Owns the conversation and serves one front end.
///
/// All state changes happen on the session loop. Completion and speech calls run
/// as spawned tasks and report back through `outcome_tx`; a reply is only applied
/// if the conversation generation it was started with is still current.
pub struct Session {
    config: Config,
    config_path: Option<PathBuf>,
    store: ConversationStore,
    library: TranscriptLibrary,
    system_prompt: String,
    title: Option<String>,
    current_file: Option<PathBuf>,
    backends: Backends,
    fixed_backends: bool,
    in_flight: Vec<AbortHandle>,
    speaking: Vec<AbortHandle>,
    pending_replies: usize,
    pending_speech: usize,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: Option<mpsc::UnboundedReceiver<TaskOutcome>>,
    events: async_channel::Sender<SessionEvent>,
}

impl Session {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        events: async_channel::Sender<SessionEvent>,
    ) -> Result<Self> {
        let backends = Backends::from_config(&config)?;
        let library = TranscriptLibrary::open(&config.transcripts_dir())?;
        let system_prompt = guidance::load(&config.system_prompt_file());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            config_path,
            store: ConversationStore::new(),
            library,
            system_prompt,
            title: None,
            current_file: None,
            backends,
            fixed_backends: false,
            in_flight: Vec::new(),
            speaking: Vec::new(),
            pending_replies: 0,
            pending_speech: 0,
            outcome_tx,
            outcome_rx: Some(outcome_rx),
            events,
        })
    }

    /// Use the given backends instead of the configured HTTP clients. They are kept
    /// across settings changes.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = backends;
        self.fixed_backends = true;
        self
    }

    /// Serve commands until `Quit`, a signal, or the command channel closing. When
    /// the channel closes, replies and speech already under way are finished first.
    pub async fn run(mut self, commands: async_channel::Receiver<SessionCommand>) -> Result<()> {
        let mut outcomes = self
            .outcome_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("session is already running"))?;

        info!(
            "Session running (model {}, window {} messages)",
            self.config.api.model, self.config.chat.max_messages
        );
        if self.config.api.openai_api_key.is_empty() {
            self.emit(SessionEvent::Notice(
                "OpenAI API key not set. Use /set openai_api_key <key>.".to_string(),
            ))
            .await;
        }

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut draining = false;

        loop {
            tokio::select! {
                cmd = commands.recv(), if !draining => {
                    match cmd {
                        Ok(cmd) => {
                            if self.handle_command(cmd).await {
                                info!("Quit requested");
                                break;
                            }
                        }
                        Err(_) if self.is_idle() => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                        Err(_) => {
                            info!("Command channel closed, finishing the current turn");
                            draining = true;
                        }
                    }
                }
                Some(outcome) = outcomes.recv() => {
                    self.handle_outcome(outcome).await;
                    if draining && self.is_idle() {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down...");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Returns true when the session should stop.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        debug!("Session command: {:?}", redacted(&cmd));
        match cmd {
            SessionCommand::Send(text) => self.send(&text).await,
            SessionCommand::NewConversation { discard_unsaved } => {
                self.new_conversation(discard_unsaved).await
            }
            SessionCommand::Save => self.save().await,
            SessionCommand::SaveAs { title, overwrite } => self.save_as(&title, overwrite).await,
            SessionCommand::Load(name) => self.load(&name).await,
            SessionCommand::Delete(name) => self.delete(&name).await,
            SessionCommand::List => self.list().await,
            SessionCommand::SetSetting { key, value } => self.set_setting(&key, &value).await,
            SessionCommand::SetSystemPrompt(text) => self.set_system_prompt(&text).await,
            SessionCommand::Quit => return true,
        }
        false
    }

    async fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Reply { generation, result } => {
                if generation != self.store.generation() {
                    debug!(
                        "Discarding reply for generation {} (current {})",
                        generation,
                        self.store.generation()
                    );
                    return;
                }
                self.pending_replies = self.pending_replies.saturating_sub(1);

                match result {
                    Ok(content) => {
                        self.store.append(Role::Assistant, content.clone());
                        self.emit(SessionEvent::AssistantReply {
                            name: self.config.settings.assistant_name.clone(),
                            content: content.clone(),
                        })
                        .await;

                        if self.config.settings.tts_enabled {
                            self.speak(content);
                        }
                    }
                    Err(e) => {
                        warn!("Completion failed: {}", e);
                        self.emit(SessionEvent::TurnFailed(e.to_string())).await;
                    }
                }
            }
            TaskOutcome::Spoken(Ok(())) => {
                self.pending_speech = self.pending_speech.saturating_sub(1);
                debug!("Speech playback finished");
            }
            TaskOutcome::Spoken(Err(e)) => {
                self.pending_speech = self.pending_speech.saturating_sub(1);
                warn!("Speech failed: {}", e);
                self.emit(SessionEvent::Error(format!("Speech: {}", e))).await;
            }
        }
    }

    async fn send(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.store.append(Role::User, text);
        let messages = prompt::build(
            self.store.messages(),
            &self.system_prompt,
            self.config.chat.max_messages,
        );
        let generation = self.store.generation();
        let completion = Arc::clone(&self.backends.completion);
        let tx = self.outcome_tx.clone();

        self.emit(SessionEvent::Thinking).await;

        let handle = tokio::spawn(async move {
            let result = completion.complete(&messages).await;
            let _ = tx.send(TaskOutcome::Reply { generation, result });
        });
        self.in_flight.retain(|h| !h.is_finished());
        self.in_flight.push(handle.abort_handle());
        self.pending_replies += 1;
    }

    fn speak(&mut self, text: String) {
        let speech = Arc::clone(&self.backends.speech);
        let audio = Arc::clone(&self.backends.audio);
        let tx = self.outcome_tx.clone();

        let handle = tokio::spawn(async move {
            let result = match speech.synthesize(&text).await {
                Ok(bytes) => audio.play(bytes).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(TaskOutcome::Spoken(result));
        });
        self.speaking.retain(|h| !h.is_finished());
        self.speaking.push(handle.abort_handle());
        self.pending_speech += 1;
    }

    fn abort_in_flight(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
        self.pending_replies = 0;
    }

    /// No reply or speech is outstanding.
    fn is_idle(&self) -> bool {
        self.pending_replies == 0 && self.pending_speech == 0
    }

    fn shutdown(&mut self) {
        self.abort_in_flight();
        for handle in self.speaking.drain(..) {
            handle.abort();
        }
        info!("Session stopped");
    }

    async fn new_conversation(&mut self, discard_unsaved: bool) {
        if !discard_unsaved && !self.store.is_empty() && self.current_file.is_none() {
            self.emit(SessionEvent::Notice(
                "The current conversation is not saved. Use /save first, or /new! to discard it."
                    .to_string(),
            ))
            .await;
            return;
        }

        self.abort_in_flight();
        self.store.clear();
        self.title = None;
        self.current_file = None;
        self.system_prompt = guidance::load(&self.config.system_prompt_file());

        info!("New conversation started");
        self.emit(SessionEvent::ConversationCleared).await;
    }

    async fn save(&mut self) {
        if self.store.is_empty() {
            self.emit(SessionEvent::Notice("No conversation to save.".to_string()))
                .await;
            return;
        }

        match self.current_file.clone() {
            Some(path) => {
                let title = self.title.clone().unwrap_or_else(|| file_stem(&path));
                self.write_transcript(path, title).await;
            }
            None => self.save_as("", false).await,
        }
    }

    async fn save_as(&mut self, title: &str, overwrite: bool) {
        if self.store.is_empty() {
            self.emit(SessionEvent::Notice("No conversation to save.".to_string()))
                .await;
            return;
        }

        let title = match title.trim() {
            "" => default_title(),
            t => t.to_string(),
        };

        let path = match self.library.path_for_title(&title) {
            Ok(path) => path,
            Err(e) => {
                self.emit(SessionEvent::Error(e.to_string())).await;
                return;
            }
        };

        let is_current = self.current_file.as_ref() == Some(&path);
        if path.exists() && !overwrite && !is_current {
            self.emit(SessionEvent::Notice(format!(
                "A conversation named '{}' already exists. Use /saveas! to overwrite it.",
                title
            )))
            .await;
            return;
        }

        self.write_transcript(path, title).await;
    }

    async fn write_transcript(&mut self, path: PathBuf, title: String) {
        let header = TranscriptHeader {
            title: Some(title.clone()),
            date: Some(Local::now().to_rfc3339()),
            system_prompt: Some(self.system_prompt.clone()),
        };

        match self.store.export(&path, &header) {
            Ok(()) => {
                self.current_file = Some(path.clone());
                self.title = Some(title.clone());
                self.emit(SessionEvent::Saved { title, path }).await;
            }
            Err(e) => {
                error!("Failed to save conversation to {:?}: {}", path, e);
                self.emit(SessionEvent::Error(format!(
                    "Failed to save conversation: {}",
                    e
                )))
                .await;
            }
        }
    }

    async fn load(&mut self, name: &str) {
        let result = self
            .library
            .resolve(name)
            .and_then(|path| self.store.import(&path).map(|header| (path, header)));

        match result {
            Ok((path, header)) => {
                self.abort_in_flight();
                if let Some(saved_prompt) = header.system_prompt {
                    self.system_prompt = saved_prompt;
                }
                let title = header
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| file_stem(&path));
                self.title = Some(title.clone());
                self.current_file = Some(path);

                self.emit(SessionEvent::ConversationLoaded {
                    title,
                    assistant_name: self.config.settings.assistant_name.clone(),
                    messages: self.store.messages().to_vec(),
                })
                .await;
            }
            Err(e) => {
                warn!("Failed to load conversation '{}': {}", name, e);
                self.emit(SessionEvent::Error(format!(
                    "Failed to load conversation: {}",
                    e
                )))
                .await;
            }
        }
    }

    async fn delete(&mut self, name: &str) {
        match self.library.delete(name) {
            Ok(path) => {
                if self.current_file.as_ref() == Some(&path) {
                    self.current_file = None;
                }
                self.emit(SessionEvent::Notice(format!(
                    "Deleted {}",
                    path.display()
                )))
                .await;
            }
            Err(e) => {
                self.emit(SessionEvent::Error(format!(
                    "Failed to delete conversation: {}",
                    e
                )))
                .await;
            }
        }
    }

    async fn list(&mut self) {
        match self.library.list() {
            Ok(list) => self.emit(SessionEvent::Transcripts(list)).await,
            Err(e) => {
                self.emit(SessionEvent::Error(format!(
                    "Failed to list conversations: {}",
                    e
                )))
                .await
            }
        }
    }

    async fn set_setting(&mut self, key: &str, value: &str) {
        let mut updated = self.config.clone();
        if let Err(e) = updated.set(key, value) {
            self.emit(SessionEvent::Error(e.to_string())).await;
            return;
        }

        if let Err(e) = self.apply_config(updated).await {
            self.emit(SessionEvent::Error(format!(
                "Failed to apply settings: {:#}",
                e
            )))
            .await;
            return;
        }

        info!("Setting '{}' updated", key);
        self.emit(SessionEvent::Notice(format!("Setting '{}' updated.", key)))
            .await;
    }

    /// Persist and switch to `updated`. Nothing changes if any step fails.
    async fn apply_config(&mut self, updated: Config) -> Result<()> {
        let backends = if self.fixed_backends {
            None
        } else {
            Some(Backends::from_config(&updated)?)
        };

        let library = if updated.chat.transcripts_dir != self.config.chat.transcripts_dir {
            Some(TranscriptLibrary::open(&updated.transcripts_dir())?)
        } else {
            None
        };

        if let Some(path) = &self.config_path {
            updated.save(path).await?;
        }

        let prompt_file_changed =
            updated.chat.system_prompt_file != self.config.chat.system_prompt_file;

        self.config = updated;
        if let Some(backends) = backends {
            self.backends = backends;
        }
        if let Some(library) = library {
            self.library = library;
        }
        if prompt_file_changed {
            self.system_prompt = guidance::load(&self.config.system_prompt_file());
        }
        Ok(())
    }

    async fn set_system_prompt(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            self.emit(SessionEvent::Notice(
                "The system prompt cannot be empty.".to_string(),
            ))
            .await;
            return;
        }

        match guidance::save(&self.config.system_prompt_file(), text) {
            Ok(()) => {
                self.system_prompt = text.to_string();
                self.emit(SessionEvent::Notice("System prompt updated.".to_string()))
                    .await;
            }
            Err(e) => {
                self.emit(SessionEvent::Error(format!("{:#}", e))).await;
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("No front end listening for session events");
        }
    }
}

fn default_title() -> String {
    format!("Conversation {}", Local::now().format("%Y-%m-%d"))
}

fn file_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Keep API keys out of the debug log.
fn redacted(cmd: &SessionCommand) -> SessionCommand {
    match cmd {
        SessionCommand::SetSetting { key, .. } if key.ends_with("api_key") => {
            SessionCommand::SetSetting {
                key: key.clone(),
                value: "<redacted>".to_string(),
            }
        }
        other => other.clone(),
    }
}
