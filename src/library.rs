use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::conversation::read_header;
use crate::error::VoxchatError;

/// A saved transcript as shown in the load list.
#[derive(Debug, Clone)]
pub struct TranscriptSummary {
    pub path: PathBuf,
    pub title: String,
    pub modified: DateTime<Local>,
}

impl std::fmt::Display for TranscriptSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.title, self.modified.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// The directory holding saved transcripts, one JSON file per conversation.
#[derive(Debug, Clone)]
pub struct TranscriptLibrary {
    dir: PathBuf,
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[:/\\]").expect("valid regex"))
}

/// File stem for a transcript title.
pub fn slugify(title: &str) -> String {
    let spaced = whitespace_re().replace_all(title.trim(), "_");
    separator_re().replace_all(&spaced, "-").to_string()
}

impl TranscriptLibrary {
    pub fn open(dir: &Path) -> Result<Self, VoxchatError> {
        std::fs::create_dir_all(dir)?;
        debug!("Transcript library at {:?}", dir);
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for_title(&self, title: &str) -> Result<PathBuf, VoxchatError> {
        let slug = slugify(title);
        if slug.is_empty() || slug.chars().all(|c| c == '.') {
            return Err(VoxchatError::Config(format!(
                "'{}' cannot be used as a transcript title",
                title
            )));
        }
        Ok(self.dir.join(format!("{}.json", slug)))
    }

    /// Saved transcripts, most recently modified first.
    pub fn list(&self) -> Result<Vec<TranscriptSummary>, VoxchatError> {
        let mut summaries = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }

            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(time) => DateTime::<Local>::from(time),
                Err(e) => {
                    warn!("Skipping transcript {:?}: {}", path, e);
                    continue;
                }
            };

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let title = match read_header(&path) {
                Ok(header) => header.title.filter(|t| !t.is_empty()).unwrap_or(stem),
                Err(e) => {
                    warn!("Skipping unreadable transcript {:?}: {}", path, e);
                    continue;
                }
            };

            summaries.push(TranscriptSummary {
                path,
                title,
                modified,
            });
        }

        summaries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(summaries)
    }

    /// Find a transcript by file stem, title, or path. Library entries win over a
    /// path with the same name.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, VoxchatError> {
        let name = name.trim();

        let by_stem = self.dir.join(format!("{}.json", name));
        if by_stem.is_file() && self.contains(&by_stem) {
            return Ok(by_stem);
        }

        if let Ok(by_slug) = self.path_for_title(name) {
            if by_slug.is_file() {
                return Ok(by_slug);
            }
        }

        if let Some(found) = self.list()?.into_iter().find(|s| s.title == name) {
            return Ok(found.path);
        }

        let direct = PathBuf::from(name);
        if direct.is_file() {
            return Ok(direct);
        }

        Err(VoxchatError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no saved conversation named '{}'", name),
        )))
    }

    /// Whether `path` is a `*.json` file directly inside the library directory.
    fn contains(&self, path: &Path) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return false;
        }
        let (Ok(file), Ok(dir)) = (path.canonicalize(), self.dir.canonicalize()) else {
            return false;
        };
        file.parent() == Some(dir.as_path()) && file.is_file()
    }

    /// Delete a saved transcript. Only files inside the library can be deleted.
    pub fn delete(&self, name: &str) -> Result<PathBuf, VoxchatError> {
        let path = self.resolve(name)?;
        if !self.contains(&path) {
            warn!("Refusing to delete {:?}: not in {:?}", path, self.dir);
            return Err(VoxchatError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("'{}' is not a saved conversation", name.trim()),
            )));
        }
        std::fs::remove_file(&path)?;
        info!("Deleted transcript {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStore, Role, TranscriptHeader};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn save(library: &TranscriptLibrary, title: Option<&str>, stem: &str) -> PathBuf {
        let mut store = ConversationStore::new();
        store.append(Role::User, "Hi");
        let path = library.dir().join(format!("{}.json", stem));
        let header = TranscriptHeader {
            title: title.map(str::to_string),
            ..Default::default()
        };
        store.export(&path, &header).unwrap();
        path
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Conversation 2026-10-19"), "Conversation_2026-10-19");
        assert_eq!(slugify("a: b/c\\d"), "a-_b-c-d");
        assert_eq!(slugify("  spaced   out  "), "spaced_out");
    }

    #[test]
    fn test_path_for_title() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();

        let path = library.path_for_title("My Chat").unwrap();
        assert_eq!(path, temp_dir.path().join("My_Chat.json"));
        assert!(library.path_for_title("   ").is_err());
        assert!(library.path_for_title("..").is_err());
    }

    #[test]
    fn test_open_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested/transcripts");
        TranscriptLibrary::open(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_list_newest_first_with_title_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();

        let old = save(&library, Some("Old chat"), "old");
        let untitled = save(&library, None, "untitled_stem");
        let new = save(&library, Some("New chat"), "new");
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        set_mtime(&old, 300);
        set_mtime(&untitled, 200);
        set_mtime(&new, 100);

        let titles: Vec<_> = library.list().unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["New chat", "untitled_stem", "Old chat"]);
    }

    #[test]
    fn test_list_skips_unreadable_files() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        save(&library, Some("Good"), "good");
        std::fs::write(temp_dir.path().join("broken.json"), "{ nope").unwrap();

        let list = library.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Good");
    }

    #[test]
    fn test_resolve_by_stem_title_and_path() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        let path = save(&library, Some("Trip planning"), "Trip_planning");
        let odd = save(&library, Some("Custom title"), "custom-file");

        assert_eq!(library.resolve("Trip_planning").unwrap(), path);
        assert_eq!(library.resolve("Trip planning").unwrap(), path);
        assert_eq!(library.resolve("Custom title").unwrap(), odd);
        assert_eq!(library.resolve(path.to_str().unwrap()).unwrap(), path);
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        let err = library.resolve("nothing here").unwrap_err();
        assert!(matches!(err, VoxchatError::Io(_)));
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        let path = save(&library, Some("Gone soon"), "Gone_soon");

        assert_eq!(library.delete("Gone soon").unwrap(), path);
        assert!(!path.exists());
        assert!(library.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_refuses_files_outside_library() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        let other_dir = TempDir::new().unwrap();

        let outside = other_dir.path().join("Cargo.toml");
        std::fs::write(&outside, "[package]").unwrap();
        let outside_json = other_dir.path().join("notes.json");
        std::fs::write(&outside_json, "{}").unwrap();

        assert!(library.delete(outside.to_str().unwrap()).is_err());
        assert!(library.delete(outside_json.to_str().unwrap()).is_err());
        assert!(outside.exists());
        assert!(outside_json.exists());

        let escaping = format!("../{}/notes", other_dir.path().file_name().unwrap().to_str().unwrap());
        assert!(library.delete(&escaping).is_err());
        assert!(outside_json.exists());
    }

    #[test]
    fn test_library_entry_wins_over_same_named_path() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();

        // Tests run from the crate root, so "Cargo.toml" is also an existing path
        let transcript = save(&library, Some("Cargo.toml"), "Cargo_toml");
        assert!(Path::new("Cargo.toml").is_file());

        assert_eq!(library.resolve("Cargo.toml").unwrap(), transcript);
        assert_eq!(library.delete("Cargo.toml").unwrap(), transcript);
        assert!(Path::new("Cargo.toml").is_file());
    }

    #[test]
    fn test_resolve_outside_path_still_loads() {
        let temp_dir = TempDir::new().unwrap();
        let library = TranscriptLibrary::open(temp_dir.path()).unwrap();
        let other_dir = TempDir::new().unwrap();
        let elsewhere = other_dir.path().join("shared.json");
        std::fs::write(&elsewhere, r#"{"messages": []}"#).unwrap();

        assert_eq!(library.resolve(elsewhere.to_str().unwrap()).unwrap(), elsewhere);
    }

    #[test]
    fn test_summary_display() {
        let summary = TranscriptSummary {
            path: PathBuf::from("x.json"),
            title: "Hello".to_string(),
            modified: Local::now(),
        };
        assert!(summary.to_string().starts_with("Hello - "));
    }
}
