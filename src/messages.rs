use std::path::PathBuf;

use crate::conversation::Message;
use crate::library::TranscriptSummary;

/// Requests from a front end to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Send(String),
    NewConversation { discard_unsaved: bool },
    Save,
    SaveAs { title: String, overwrite: bool },
    Load(String),
    Delete(String),
    List,
    SetSetting { key: String, value: String },
    SetSystemPrompt(String),
    Quit,
}

/// Updates from the session for a front end to render.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Thinking,
    AssistantReply {
        name: String,
        content: String,
    },
    TurnFailed(String),
    ConversationCleared,
    ConversationLoaded {
        title: String,
        assistant_name: String,
        messages: Vec<Message>,
    },
    Saved {
        title: String,
        path: PathBuf,
    },
    Transcripts(Vec<TranscriptSummary>),
    Notice(String),
    Error(String),
}
