use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::VoxchatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Metadata saved alongside the messages of a transcript.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TranscriptHeader {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Serialize)]
struct TranscriptOut<'a> {
    #[serde(flatten)]
    header: &'a TranscriptHeader,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct TranscriptIn {
    #[serde(flatten)]
    header: TranscriptHeader,
    messages: Vec<Message>,
}

/// The ordered message history of the current chat.
///
/// `generation` changes whenever the history is replaced as a whole (clear or
/// import), so work started against an older history can be recognised and dropped.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    generation: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.generation += 1;
        debug!("Conversation cleared (generation {})", self.generation);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write the whole conversation to `destination`.
    ///
    /// The file is written next to the destination first and renamed into place, so a
    /// failed export never leaves a truncated transcript behind.
    pub fn export(&self, destination: &Path, header: &TranscriptHeader) -> Result<(), VoxchatError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let document = TranscriptOut {
            header,
            messages: &self.messages,
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| VoxchatError::Parse(format!("failed to encode transcript: {}", e)))?;

        let mut tmp_name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = destination.with_file_name(tmp_name);

        if let Err(e) = std::fs::write(&tmp_path, json) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp_path, destination) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }

        info!(
            "Exported {} messages to {:?}",
            self.messages.len(),
            destination
        );
        Ok(())
    }

    /// Replace the conversation with the transcript stored at `source`.
    ///
    /// Nothing changes unless the whole file reads and parses.
    pub fn import(&mut self, source: &Path) -> Result<TranscriptHeader, VoxchatError> {
        let content = std::fs::read_to_string(source)?;
        let transcript: TranscriptIn = serde_json::from_str(&content)
            .map_err(|e| VoxchatError::Parse(format!("{:?}: {}", source, e)))?;

        self.messages = transcript.messages;
        self.generation += 1;

        info!(
            "Imported {} messages from {:?} (generation {})",
            self.messages.len(),
            source,
            self.generation
        );
        Ok(transcript.header)
    }
}

/// Read only the header of a transcript, without validating its messages.
pub fn read_header(source: &Path) -> Result<TranscriptHeader, VoxchatError> {
    let content = std::fs::read_to_string(source)?;
    serde_json::from_str(&content).map_err(|e| VoxchatError::Parse(format!("{:?}: {}", source, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header(title: &str) -> TranscriptHeader {
        TranscriptHeader {
            title: Some(title.to_string()),
            date: Some("2026-10-19T12:00:00+00:00".to_string()),
            system_prompt: Some("Be brief.".to_string()),
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let mut store = ConversationStore::new();
        store.append(Role::User, "first");
        store.append(Role::Assistant, "second");
        store.append(Role::User, "");

        assert_eq!(store.len(), 3);
        assert_eq!(store.messages()[0], Message::user("first"));
        assert_eq!(store.messages()[1], Message::assistant("second"));
        assert_eq!(store.last(), Some(&Message::user("")));
    }

    #[test]
    fn test_append_tolerates_any_sequence() {
        let mut store = ConversationStore::new();
        store.append(Role::Assistant, "a");
        store.append(Role::Assistant, "b");
        store.append(Role::System, "c");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_clear_twice_matches_clear_once() {
        let mut store = ConversationStore::new();
        store.append(Role::User, "Hi");
        store.clear();
        let after_once = store.messages().to_vec();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.messages(), after_once.as_slice());
    }

    #[test]
    fn test_clear_bumps_generation_append_does_not() {
        let mut store = ConversationStore::new();
        let start = store.generation();
        store.append(Role::User, "Hi");
        assert_eq!(store.generation(), start);
        store.clear();
        assert_eq!(store.generation(), start + 1);
    }

    #[test]
    fn test_export_import_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chat.json");

        let mut store = ConversationStore::new();
        store.append(Role::User, "Hi");
        store.append(Role::Assistant, "Hello!");
        store.export(&path, &header("Greeting")).unwrap();

        let mut fresh = ConversationStore::new();
        let loaded = fresh.import(&path).unwrap();
        assert_eq!(
            fresh.messages(),
            &[Message::user("Hi"), Message::assistant("Hello!")]
        );
        assert_eq!(loaded.title.as_deref(), Some("Greeting"));
        assert_eq!(loaded.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_round_trip_keeps_awkward_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("awkward.json");

        let contents = [
            "line one\nline two\n\n",
            "quotes \" and \\ backslashes",
            "unicode: héllo 日本語 🎙",
            "",
            "   padded   ",
            "{\"role\": \"user\"}",
        ];
        let mut store = ConversationStore::new();
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append(role, *content);
        }
        store.export(&path, &TranscriptHeader::default()).unwrap();

        let mut fresh = ConversationStore::new();
        fresh.import(&path).unwrap();
        assert_eq!(fresh.messages(), store.messages());
    }

    #[test]
    fn test_export_empty_conversation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.json");

        ConversationStore::new()
            .export(&path, &TranscriptHeader::default())
            .unwrap();

        let mut store = ConversationStore::new();
        store.append(Role::User, "will be replaced");
        store.import(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_export_creates_parent_and_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/chat.json");

        let mut store = ConversationStore::new();
        store.append(Role::User, "Hi");
        store.export(&path, &header("t")).unwrap();

        assert!(path.exists());
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_export_unwritable_destination_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();

        let store = ConversationStore::new();
        let err = store
            .export(&blocker.join("chat.json"), &TranscriptHeader::default())
            .unwrap_err();
        assert!(matches!(err, VoxchatError::Io(_)));
    }

    #[test]
    fn test_import_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = ConversationStore::new();
        let err = store
            .import(&temp_dir.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(err, VoxchatError::Io(_)));
    }

    #[test]
    fn test_import_missing_role_keeps_prior_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(
            &path,
            r#"{"messages": [{"role": "user", "content": "ok"}, {"content": "no role"}]}"#,
        )
        .unwrap();

        let mut store = ConversationStore::new();
        store.append(Role::User, "keep me");
        let generation = store.generation();

        let err = store.import(&path).unwrap_err();
        assert!(matches!(err, VoxchatError::Parse(_)));
        assert_eq!(store.messages(), &[Message::user("keep me")]);
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn test_import_rejects_missing_content_unknown_role_and_bad_json() {
        let temp_dir = TempDir::new().unwrap();
        let cases = [
            r#"{"messages": [{"role": "user"}]}"#,
            r#"{"messages": [{"role": "narrator", "content": "x"}]}"#,
            r#"{"title": "no messages"}"#,
            "not json at all",
        ];

        for (i, body) in cases.iter().enumerate() {
            let path = temp_dir.path().join(format!("case{}.json", i));
            std::fs::write(&path, body).unwrap();

            let mut store = ConversationStore::new();
            let err = store.import(&path).unwrap_err();
            assert!(matches!(err, VoxchatError::Parse(_)), "case {}", i);
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_import_without_header_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bare.json");
        std::fs::write(
            &path,
            r#"{"messages": [{"role": "assistant", "content": "first"}, {"role": "system", "content": "odd"}]}"#,
        )
        .unwrap();

        let mut store = ConversationStore::new();
        let header = store.import(&path).unwrap();
        assert_eq!(header, TranscriptHeader::default());
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[1].role, Role::System);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_read_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chat.json");

        let mut store = ConversationStore::new();
        store.append(Role::User, "Hi");
        store.export(&path, &header("Only the header")).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.title.as_deref(), Some("Only the header"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
